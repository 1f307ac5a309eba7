use std::fmt;
use std::io;

use asyncoss_checksum::Crc64;
use asyncoss_crypto::CipherTransform;
use bytes::Bytes;
use futures_util::Stream;
use tracing::{debug, trace};

use crate::pipeline::{ChunkContext, Pipeline, Stage};
use crate::progress::ProgressSink;
use crate::source::{ByteSource, ChunkSource, SourceKind};
use crate::{CHUNK_SIZE, ConfigError, ReadState};

/// Wraps one source and runs the attached stages over every chunk read.
///
/// Reads are single-pass: once the source reports end of data the adapter
/// latches into [`ReadState::Exhausted`] and every later read returns an
/// empty chunk without touching the source again.
pub struct ChunkAdapter<S = ByteSource> {
    source: S,
    kind: SourceKind,
    offset: u64,
    discard: u64,
    progress_total: Option<u64>,
    pipeline: Pipeline,
    state: ReadState,
}

impl<S: ChunkSource> ChunkAdapter<S> {
    /// Starts configuring an adapter over `source`.
    pub fn builder(source: S) -> AdapterBuilder<S> {
        AdapterBuilder {
            source,
            pipeline: Pipeline::new(),
            progress_total: None,
            discard: 0,
        }
    }

    /// Wraps `source` with no processing stages.
    pub fn new(source: S) -> Result<Self, ConfigError> {
        Self::builder(source).build()
    }

    /// Total size, for sized sources only.
    pub fn size(&self) -> Option<u64> {
        match self.kind {
            SourceKind::Sized(size) => Some(size),
            SourceKind::FileLike | SourceKind::Iterable => None,
        }
    }

    /// Shape resolved from the source's capabilities.
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Bytes pulled from the source so far, discarded bytes included.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes still to be excluded from checksum and output.
    pub fn remaining_discard(&self) -> u64 {
        self.discard
    }

    pub fn state(&self) -> ReadState {
        self.state
    }

    /// Running CRC, if a checksum stage is attached.
    pub fn crc(&self) -> Option<u64> {
        self.pipeline.crc()
    }

    /// Stage names in processing order.
    pub fn stages(&self) -> Vec<&'static str> {
        self.pipeline.stage_names()
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Reads up to `amount` processed bytes, or everything left when `None`.
    ///
    /// Returns an empty chunk exactly when the source is exhausted.
    pub async fn read(&mut self, amount: Option<usize>) -> io::Result<Bytes> {
        if self.state == ReadState::Exhausted || amount == Some(0) {
            return Ok(Bytes::new());
        }

        loop {
            // Bytes inside the discard window are stripped by the cipher, so
            // ask for enough extra to still hand back `amount` bytes.
            let request = match amount {
                Some(n) if self.discard > 0 => Some(n.saturating_add(self.discard as usize)),
                other => other,
            };

            let chunk = self.source.read(request).await?;
            if chunk.is_empty() {
                trace!(offset = self.offset, "source exhausted");
                self.state = ReadState::Exhausted;
                return Ok(chunk);
            }

            self.offset += chunk.len() as u64;
            let real_discard = self.discard.min(chunk.len() as u64);
            let ctx = ChunkContext {
                consumed: self.progress_offset(),
                total: self.progress_total.or(self.size()),
                discard: real_discard as usize,
            };
            let out = self.pipeline.process(chunk, &ctx);
            self.discard -= real_discard;

            // A chunk that fell entirely inside the discard window yields
            // nothing; keep pulling so empty still means end of data.
            if !out.is_empty() {
                return Ok(out);
            }
        }
    }

    /// Reads the next [`CHUNK_SIZE`] chunk. Returns `None` at end of data.
    pub async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let chunk = self.read(Some(CHUNK_SIZE)).await?;
        Ok((!chunk.is_empty()).then_some(chunk))
    }

    /// Consumes the adapter into a stream of [`CHUNK_SIZE`] chunks.
    ///
    /// The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send
    where
        S: 'static,
    {
        futures_util::stream::unfold(Some(self), |adapter| async move {
            let mut adapter = adapter?;
            match adapter.next_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(adapter))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    fn progress_offset(&self) -> u64 {
        match self.kind {
            SourceKind::Sized(size) => self.offset.min(size),
            SourceKind::FileLike | SourceKind::Iterable => self.offset,
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for ChunkAdapter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkAdapter")
            .field("source", &self.source)
            .field("kind", &self.kind)
            .field("offset", &self.offset)
            .field("discard", &self.discard)
            .field("pipeline", &self.pipeline)
            .field("state", &self.state)
            .finish()
    }
}

/// Configures the stages of a [`ChunkAdapter`].
///
/// Validation happens in [`build`](Self::build), before any byte is read.
pub struct AdapterBuilder<S> {
    source: S,
    pipeline: Pipeline,
    progress_total: Option<u64>,
    discard: u64,
}

impl<S: ChunkSource> AdapterBuilder<S> {
    /// Reports progress to `sink` after every chunk.
    pub fn progress(mut self, sink: ProgressSink) -> Self {
        self.pipeline.push(Stage::Progress(sink));
        self
    }

    /// Total reported to the progress sink when the source has no size.
    pub fn progress_total(mut self, total: Option<u64>) -> Self {
        self.progress_total = total;
        self
    }

    /// Computes CRC-64 starting from `init_crc`.
    pub fn crc(mut self, init_crc: u64) -> Self {
        self.pipeline.push(Stage::Checksum(Crc64::with_initial(init_crc)));
        self
    }

    /// Runs every chunk through `cipher`.
    pub fn cipher(mut self, cipher: Box<dyn CipherTransform>) -> Self {
        self.pipeline.push(Stage::Cipher(cipher));
        self
    }

    /// Excludes the first `discard` bytes from checksum and output.
    ///
    /// Used to realign a block cipher when a ranged read starts mid-block.
    pub fn discard(mut self, discard: u64) -> Self {
        self.discard = discard;
        self
    }

    /// Validates the configuration and creates the adapter.
    pub fn build(self) -> Result<ChunkAdapter<S>, ConfigError> {
        let caps = self.source.capabilities();
        let kind = caps.resolve().ok_or(ConfigError::UnsupportedSource)?;

        if self.discard > 0 {
            if kind != SourceKind::FileLike {
                return Err(ConfigError::DiscardUnsupported(kind));
            }
            if !self.pipeline.has_cipher() {
                return Err(ConfigError::DiscardWithoutCipher);
            }
        }

        debug!(
            kind = %kind,
            stages = ?self.pipeline.stage_names(),
            discard = self.discard,
            "chunk adapter ready"
        );

        Ok(ChunkAdapter {
            source: self.source,
            kind,
            offset: 0,
            discard: self.discard,
            progress_total: self.progress_total,
            pipeline: self.pipeline,
            state: ReadState::Open,
        })
    }
}

/// Adapter computing CRC-64 over everything read from `source`.
pub fn make_crc_adapter<S: ChunkSource>(
    source: S,
    init_crc: u64,
) -> Result<ChunkAdapter<S>, ConfigError> {
    ChunkAdapter::builder(source).crc(init_crc).build()
}

/// Adapter reporting progress; `size` overrides the source's own size for
/// reporting.
pub fn make_progress_adapter<S: ChunkSource>(
    source: S,
    sink: ProgressSink,
    size: Option<u64>,
) -> Result<ChunkAdapter<S>, ConfigError> {
    ChunkAdapter::builder(source)
        .progress(sink)
        .progress_total(size)
        .build()
}

/// Adapter encrypting or decrypting `source`, dropping the first `discard`
/// transformed bytes.
pub fn make_cipher_adapter<S: ChunkSource>(
    source: S,
    cipher: Box<dyn CipherTransform>,
    discard: u64,
) -> Result<ChunkAdapter<S>, ConfigError> {
    ChunkAdapter::builder(source)
        .cipher(cipher)
        .discard(discard)
        .build()
}
