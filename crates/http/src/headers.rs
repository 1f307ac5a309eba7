//! Header names exchanged with the storage service.

/// Request id assigned by the service to every response.
pub const OSS_REQUEST_ID: &str = "x-oss-request-id";

/// Server-side CRC-64 of the stored object.
pub const OSS_HASH_CRC64_ECMA: &str = "x-oss-hash-crc64ecma";

/// Wrapped content key of a client-side encrypted object (base64).
pub const CSE_KEY: &str = "x-oss-meta-client-side-encryption-key";

/// Wrapped content IV of a client-side encrypted object (base64).
pub const CSE_START: &str = "x-oss-meta-client-side-encryption-start";

/// Content encryption algorithm of a client-side encrypted object.
pub const CSE_CEK_ALG: &str = "x-oss-meta-client-side-encryption-cek-alg";

/// Key wrap algorithm of a client-side encrypted object.
pub const CSE_WRAP_ALG: &str = "x-oss-meta-client-side-encryption-wrap-alg";

/// JSON material description of a client-side encrypted object.
pub const CSE_MATDESC: &str = "x-oss-meta-client-side-encryption-matdesc";

/// Wrapped content key written by the legacy encryption client.
pub const DEPRECATED_CSE_KEY: &str = "x-oss-meta-oss-crypto-key";
