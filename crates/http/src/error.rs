//! Error types for the HTTP layer.

use asyncoss_crypto::CryptoError;
use asyncoss_transfer::ConfigError;

/// Failure to deliver a request: body I/O or transport.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Errors produced by the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("client error: {0}")]
    Config(#[from] ConfigError),

    #[error("request error: {0}")]
    Request(#[from] RequestError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("invalid header {name}: {value:?}")]
    InvalidHeader { name: String, value: String },

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error(
        "inconsistent CRC64 for {operation}: client {client}, server {server}, request id {request_id}"
    )]
    CrcMismatch {
        operation: String,
        client: u64,
        server: u64,
        request_id: String,
    },
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Request(RequestError::Io(e))
    }
}
