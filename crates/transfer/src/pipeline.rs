//! Ordered per-chunk processing stages.
//!
//! Every non-empty chunk pulled from a source passes through the attached
//! stages in a fixed order: progress, checksum, cipher. Each stage maps
//! `(chunk, context)` to a chunk; only the cipher stage changes bytes.

use std::fmt;

use asyncoss_checksum::Crc64;
use asyncoss_crypto::CipherTransform;
use bytes::{Bytes, BytesMut};

use crate::progress::ProgressSink;

/// Per-chunk facts shared by all stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkContext {
    /// Bytes pulled from the source including this chunk.
    pub consumed: u64,
    /// Total size reported to progress sinks, if known.
    pub total: Option<u64>,
    /// Leading bytes of this chunk inside the discard window.
    pub discard: usize,
}

/// One processing stage.
pub enum Stage {
    /// Reports `(consumed, total)`.
    Progress(ProgressSink),
    /// Folds bytes after the discard boundary into a running CRC.
    Checksum(Crc64),
    /// Transforms the chunk and strips the discarded prefix.
    Cipher(Box<dyn CipherTransform>),
}

impl Stage {
    /// Position of the stage in the pipeline.
    fn rank(&self) -> u8 {
        match self {
            Stage::Progress(_) => 0,
            Stage::Checksum(_) => 1,
            Stage::Cipher(_) => 2,
        }
    }

    /// Short stage name, for logs and assertions.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Progress(_) => "progress",
            Stage::Checksum(_) => "checksum",
            Stage::Cipher(_) => "cipher",
        }
    }

    /// Applies the stage to one chunk.
    pub fn apply(&mut self, chunk: Bytes, ctx: &ChunkContext) -> Bytes {
        match self {
            Stage::Progress(sink) => {
                sink.report(ctx.consumed, ctx.total);
                chunk
            }
            Stage::Checksum(crc) => {
                crc.update(&chunk[ctx.discard..]);
                chunk
            }
            Stage::Cipher(cipher) => {
                // The whole chunk goes through the cipher so the keystream
                // stays aligned; the discarded prefix is then dropped.
                let mut buf = BytesMut::from(&chunk[..]);
                cipher.apply(&mut buf);
                buf.freeze().slice(ctx.discard..)
            }
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Checksum(crc) => write!(f, "Checksum({:#018x})", crc.value()),
            other => f.write_str(other.name()),
        }
    }
}

/// Stages attached to one adapter, kept in processing order.
#[derive(Debug, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a stage, replacing any existing stage of the same kind.
    pub fn push(&mut self, stage: Stage) {
        let rank = stage.rank();
        self.stages.retain(|s| s.rank() != rank);
        let at = self
            .stages
            .iter()
            .position(|s| s.rank() > rank)
            .unwrap_or(self.stages.len());
        self.stages.insert(at, stage);
    }

    /// Runs every stage over `chunk` in order.
    pub fn process(&mut self, chunk: Bytes, ctx: &ChunkContext) -> Bytes {
        self.stages
            .iter_mut()
            .fold(chunk, |chunk, stage| stage.apply(chunk, ctx))
    }

    /// Stage names in processing order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Whether a cipher stage is attached.
    pub fn has_cipher(&self) -> bool {
        self.stages.iter().any(|s| matches!(s, Stage::Cipher(_)))
    }

    /// Current CRC, if a checksum stage is attached.
    pub fn crc(&self) -> Option<u64> {
        self.stages.iter().find_map(|s| match s {
            Stage::Checksum(crc) => Some(crc.value()),
            _ => None,
        })
    }
}
