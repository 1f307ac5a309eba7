//! Streaming body adapters with per-chunk checksum, progress and cipher
//! stages.
//!
//! A [`ChunkAdapter`] wraps one [`ChunkSource`] (an in-memory buffer, a
//! file, an async reader, a chunk stream, or a response body) and runs an
//! ordered [`Pipeline`] over every chunk as it is read, so uploads and
//! downloads can be checksummed, metered and encrypted without holding the
//! whole payload.

mod adapter;
mod pipeline;
mod progress;
mod source;

pub use adapter::{
    AdapterBuilder, ChunkAdapter, make_cipher_adapter, make_crc_adapter, make_progress_adapter,
};
pub use pipeline::{ChunkContext, Pipeline, Stage};
pub use progress::{Progress, ProgressCallback, ProgressSink};
pub use source::{
    ByteSource, ChunkSource, ReadFuture, SourceCapabilities, SourceKind,
};

/// Internal buffering chunk size: 8 KiB.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Read state of a single-pass body.
///
/// `Exhausted` is terminal: once reached, reads return empty chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Open,
    Exhausted,
}

/// Invalid adapter configuration, reported before any read.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} adapter does not support discard bytes")]
    DiscardUnsupported(SourceKind),

    #[error("discard bytes require a cipher transform")]
    DiscardWithoutCipher,

    #[error("source is not sized, not readable and not iterable")]
    UnsupportedSource,
}
