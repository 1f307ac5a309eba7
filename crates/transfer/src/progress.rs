use std::fmt;

use tokio::sync::mpsc;

/// Callback invoked with `(consumed_bytes, total_bytes)`.
pub type ProgressCallback = Box<dyn FnMut(u64, Option<u64>) + Send>;

/// Progress snapshot delivered through a channel sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes pulled from the source so far.
    pub consumed_bytes: u64,
    /// Total bytes expected, if known.
    pub total_bytes: Option<u64>,
}

/// Receiver of per-chunk progress notifications.
pub struct ProgressSink {
    callback: ProgressCallback,
}

impl ProgressSink {
    /// Wraps a closure.
    pub fn new(callback: impl FnMut(u64, Option<u64>) + Send + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Forwards progress to a channel without blocking.
    ///
    /// Updates are dropped when the channel is full, and that includes the
    /// final report. Consumers must not wait for `consumed_bytes ==
    /// total_bytes` to detect completion; the read returning end of data is
    /// the completion signal. Size the channel to hold every update when each
    /// one matters.
    pub fn channel(tx: mpsc::Sender<Progress>) -> Self {
        Self::new(move |consumed_bytes, total_bytes| {
            let _ = tx.try_send(Progress {
                consumed_bytes,
                total_bytes,
            });
        })
    }

    pub(crate) fn report(&mut self, consumed: u64, total: Option<u64>) {
        (self.callback)(consumed, total);
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressSink")
    }
}
