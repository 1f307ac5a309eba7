use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;

use crate::{AES_BLOCK_LEN, AES_KEY_LEN, CryptoError};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// A stateful keystream transform applied chunk by chunk.
///
/// Implementations keep their position between calls, so feeding chunks in
/// order produces the same output as transforming the concatenation.
pub trait CipherTransform: Send {
    /// Transforms `data` in place and advances the keystream by its length.
    fn apply(&mut self, data: &mut [u8]);
}

/// AES-256-CTR with a 128-bit big-endian counter.
pub struct AesCtrCipher {
    inner: Aes256Ctr,
}

impl AesCtrCipher {
    /// Creates a cipher whose keystream starts `block_offset` blocks after `iv`.
    pub fn new(key: &[u8], iv: &[u8], block_offset: u64) -> Result<Self, CryptoError> {
        if key.len() != AES_KEY_LEN {
            return Err(CryptoError::InvalidKeyLength(key.len()));
        }
        let iv: [u8; AES_BLOCK_LEN] = iv
            .try_into()
            .map_err(|_| CryptoError::InvalidIvLength(iv.len()))?;

        let counter = u128::from_be_bytes(iv).wrapping_add(u128::from(block_offset));
        let inner = Aes256Ctr::new_from_slices(key, &counter.to_be_bytes())
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
        Ok(Self { inner })
    }
}

impl CipherTransform for AesCtrCipher {
    fn apply(&mut self, data: &mut [u8]) {
        self.inner.apply_keystream(data);
    }
}

/// Converts a block-aligned byte offset into a counter offset.
pub fn calc_offset(byte_offset: u64) -> Result<u64, CryptoError> {
    if byte_offset % AES_BLOCK_LEN as u64 != 0 {
        return Err(CryptoError::UnalignedOffset(byte_offset));
    }
    Ok(byte_offset / AES_BLOCK_LEN as u64)
}

/// Aligns a requested range start down to a cipher block boundary.
///
/// The caller discards `start - aligned_start` decrypted bytes to recover
/// the requested range.
pub fn adjust_range(start: u64, end: u64) -> (u64, u64) {
    (start - start % AES_BLOCK_LEN as u64, end)
}

/// Generates a fresh content key and IV.
pub fn random_key_iv() -> ([u8; AES_KEY_LEN], [u8; AES_BLOCK_LEN]) {
    let mut rng = rand::thread_rng();
    let mut key = [0u8; AES_KEY_LEN];
    let mut iv = [0u8; AES_BLOCK_LEN];
    rng.fill_bytes(&mut key);
    rng.fill_bytes(&mut iv);
    (key, iv)
}
