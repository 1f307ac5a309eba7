//! Async HTTP transport for object storage.
//!
//! A [`Session`] delivers already-signed [`Request`]s over pooled
//! connections and returns [`Response`]s whose bodies are read
//! incrementally. [`GetObjectResult`] layers progress reporting, CRC-64
//! verification and client-side decryption over a response body.

pub mod config;
pub mod error;
pub mod headers;
mod object;
mod request;
mod response;
mod session;

pub use asyncoss_transfer::CHUNK_SIZE;
pub use config::SessionConfig;
pub use error::{Error, RequestError};
pub use object::{
    ContentCryptoMaterial, ContentRange, GetObjectOptions, GetObjectResult, check_crc,
    parse_content_range,
};
pub use request::{Request, user_agent};
pub use response::Response;
pub use session::Session;

/// Idle connections kept per host by default.
pub const DEFAULT_CONNECTION_POOL_SIZE: usize = 10;
