use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cipher::{AesCtrCipher, CipherTransform};
use crate::{CEK_ALG_AES_CTR, CryptoError};

/// Free-form key/value description identifying a set of master keys.
///
/// Stored with each encrypted object so the right master key can be chosen
/// on download.
pub type MaterialDescription = BTreeMap<String, String>;

/// Source of master keys able to unwrap per-object content keys.
///
/// Implementations wrap RSA, KMS or any other key management scheme; the
/// transfer path only needs the unwrapped key and IV.
pub trait CryptoProvider: Send + Sync {
    /// Description of the materials this provider currently uses.
    fn mat_desc(&self) -> &MaterialDescription;

    /// Key wrap algorithm tag written to object metadata.
    fn wrap_alg(&self) -> &str;

    /// Content encryption algorithm tag written to object metadata.
    fn cek_alg(&self) -> &str {
        CEK_ALG_AES_CTR
    }

    /// Unwraps an encrypted content key.
    fn decrypt_encrypted_key(&self, encrypted_key: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Unwraps an encrypted content IV.
    fn decrypt_encrypted_iv(&self, encrypted_iv: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Returns a provider bound to the materials matching `mat_desc`, if any.
    fn materials_for(&self, mat_desc: &MaterialDescription) -> Option<Arc<dyn CryptoProvider>>;

    /// Creates the content cipher positioned at `block_offset`.
    fn make_cipher(
        &self,
        key: &[u8],
        iv: &[u8],
        block_offset: u64,
    ) -> Result<Box<dyn CipherTransform>, CryptoError> {
        if self.cek_alg() != CEK_ALG_AES_CTR {
            return Err(CryptoError::UnsupportedAlgorithm(self.cek_alg().to_string()));
        }
        Ok(Box::new(AesCtrCipher::new(key, iv, block_offset)?))
    }
}
