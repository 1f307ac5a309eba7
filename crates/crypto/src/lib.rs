//! Client-side encryption primitives for object bodies.
//!
//! Objects are encrypted with AES-256-CTR under a per-object content key.
//! The content key and IV are stored wrapped in object metadata; a
//! [`CryptoProvider`] unwraps them. Because CTR is a stream mode, the same
//! [`CipherTransform`] encrypts on upload and decrypts on download, and a
//! ranged read can start the keystream at any 16-byte block.

mod cipher;
mod provider;

pub use cipher::{AesCtrCipher, CipherTransform, adjust_range, calc_offset, random_key_iv};
pub use provider::{CryptoProvider, MaterialDescription};

/// AES block size in bytes.
pub const AES_BLOCK_LEN: usize = 16;

/// AES-256 key length in bytes.
pub const AES_KEY_LEN: usize = 32;

/// Content encryption algorithm tag stored in object metadata.
pub const CEK_ALG_AES_CTR: &str = "AES/CTR/NoPadding";

/// Errors produced by the crypto crate.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {AES_KEY_LEN}, got {0}")]
    InvalidKeyLength(usize),

    #[error("invalid IV length: expected {AES_BLOCK_LEN}, got {0}")]
    InvalidIvLength(usize),

    #[error("offset {0} is not aligned to the cipher block size")]
    UnalignedOffset(u64),

    #[error("unsupported content encryption algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("no encryption materials match the material description of the object")]
    MaterialMismatch,

    #[error("key unwrap failed: {0}")]
    KeyUnwrap(String),

    #[error("invalid encryption metadata: {0}")]
    InvalidMaterial(String),
}
