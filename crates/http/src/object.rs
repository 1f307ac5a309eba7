//! Object downloads with progress, CRC-64 and client-side decryption.

use std::io;
use std::sync::Arc;

use asyncoss_crypto::{CEK_ALG_AES_CTR, CryptoError, CryptoProvider, MaterialDescription, calc_offset};
use asyncoss_transfer::{ChunkAdapter, ProgressSink};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use futures_util::Stream;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::headers::{
    CSE_CEK_ALG, CSE_KEY, CSE_MATDESC, CSE_START, CSE_WRAP_ALG, DEPRECATED_CSE_KEY,
    OSS_HASH_CRC64_ECMA,
};
use crate::response::Response;

/// Byte range reported by a `Content-Range: bytes a-b/total` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    /// Inclusive.
    pub end: u64,
    /// `None` when the service reports `*`.
    pub total: Option<u64>,
}

/// Parses a `Content-Range` header value.
pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes ")?;
    let (range, total) = rest.split_once('/')?;
    let (start, end) = range.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let end = end.trim().parse().ok()?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    if end < start {
        return None;
    }
    Some(ContentRange { start, end, total })
}

/// Compares client and server CRC-64 values for `operation`.
///
/// Missing values on either side are not an error.
pub fn check_crc(
    operation: &str,
    client: Option<u64>,
    server: Option<u64>,
    request_id: &str,
) -> Result<(), Error> {
    match (client, server) {
        (Some(client), Some(server)) if client != server => Err(Error::CrcMismatch {
            operation: operation.to_string(),
            client,
            server,
            request_id: request_id.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Encryption metadata stored with a client-side encrypted object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentCryptoMaterial {
    /// Wrapped content key.
    pub encrypted_key: Vec<u8>,
    /// Wrapped content IV.
    pub encrypted_iv: Vec<u8>,
    pub cek_alg: String,
    pub wrap_alg: String,
    pub mat_desc: MaterialDescription,
}

impl ContentCryptoMaterial {
    /// Reads encryption metadata from object headers.
    ///
    /// Returns `Ok(None)` for objects stored without client-side encryption.
    pub fn from_headers(headers: &HeaderMap) -> Result<Option<Self>, CryptoError> {
        let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        let Some(key) = get(CSE_KEY) else {
            if headers.contains_key(DEPRECATED_CSE_KEY) {
                return Err(CryptoError::InvalidMaterial(
                    "objects written by the legacy encryption client are not supported".into(),
                ));
            }
            return Ok(None);
        };

        let required = |name: &str| {
            get(name).ok_or_else(|| CryptoError::InvalidMaterial(format!("missing header {name}")))
        };
        let decode = |name: &str, value: &str| {
            STANDARD
                .decode(value)
                .map_err(|e| CryptoError::InvalidMaterial(format!("{name}: {e}")))
        };

        let encrypted_key = decode(CSE_KEY, key)?;
        let encrypted_iv = decode(CSE_START, required(CSE_START)?)?;
        let cek_alg = required(CSE_CEK_ALG)?.to_string();
        let wrap_alg = required(CSE_WRAP_ALG)?.to_string();
        let mat_desc = match get(CSE_MATDESC) {
            Some(json) if !json.is_empty() => serde_json::from_str(json)
                .map_err(|e| CryptoError::InvalidMaterial(format!("{CSE_MATDESC}: {e}")))?,
            _ => MaterialDescription::new(),
        };

        Ok(Some(Self {
            encrypted_key,
            encrypted_iv,
            cek_alg,
            wrap_alg,
            mat_desc,
        }))
    }

    /// Writes the metadata headers for an encrypted upload.
    pub fn to_headers(&self, headers: &mut HeaderMap) -> Result<(), Error> {
        let mat_desc = if self.mat_desc.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&self.mat_desc).map_err(|e| Error::InvalidHeader {
                name: CSE_MATDESC.to_string(),
                value: e.to_string(),
            })?
        };
        let entries = [
            (CSE_KEY, STANDARD.encode(&self.encrypted_key)),
            (CSE_START, STANDARD.encode(&self.encrypted_iv)),
            (CSE_CEK_ALG, self.cek_alg.clone()),
            (CSE_WRAP_ALG, self.wrap_alg.clone()),
            (CSE_MATDESC, mat_desc),
        ];
        for (name, value) in entries {
            if value.is_empty() {
                continue;
            }
            let header_value = HeaderValue::from_str(&value).map_err(|_| Error::InvalidHeader {
                name: name.to_string(),
                value: value.clone(),
            })?;
            headers.insert(HeaderName::from_static(name), header_value);
        }
        Ok(())
    }
}

/// Download options for [`GetObjectResult`].
#[derive(Default)]
pub struct GetObjectOptions {
    pub progress: Option<ProgressSink>,
    /// Compute CRC-64 over the received bytes.
    pub crc_enabled: bool,
    pub crypto_provider: Option<Arc<dyn CryptoProvider>>,
    /// Leading decrypted bytes to drop. Set when a ranged read of an
    /// encrypted object was widened to a cipher block boundary.
    pub discard: u64,
}

/// Body and metadata of a downloaded object.
///
/// Every received chunk passes through progress reporting, CRC-64 and
/// decryption, as configured, before it is returned.
pub struct GetObjectResult {
    status: u16,
    request_id: String,
    headers: HeaderMap,
    content_range: Option<ContentRange>,
    content_length: Option<u64>,
    encrypted: bool,
    stream: ChunkAdapter<Response>,
}

impl GetObjectResult {
    /// Wraps `resp`, resolving decryption materials before any byte is read.
    ///
    /// Fails with [`CryptoError::MaterialMismatch`] when the provider holds
    /// no materials for the object's description.
    pub fn new(resp: Response, options: GetObjectOptions) -> Result<Self, Error> {
        let status = resp.status();
        let request_id = resp.request_id().to_string();
        let headers = resp.headers().clone();

        let content_range = match resp.header(CONTENT_RANGE.as_str()) {
            Some(value) => Some(parse_content_range(value).ok_or_else(|| Error::InvalidHeader {
                name: CONTENT_RANGE.to_string(),
                value: value.to_string(),
            })?),
            None => None,
        };
        let content_length = resp
            .header(CONTENT_LENGTH.as_str())
            .and_then(|v| v.parse::<u64>().ok());

        let material = ContentCryptoMaterial::from_headers(&headers)?;
        let encrypted = material.is_some();

        let mut builder = ChunkAdapter::builder(resp);
        if let Some(sink) = options.progress {
            builder = builder.progress(sink).progress_total(content_length);
        }
        if options.crc_enabled {
            builder = builder.crc(0);
        }

        match (material, options.crypto_provider) {
            (Some(material), Some(provider)) => {
                let provider = resolve_provider(provider, &material.mat_desc)?;
                if material.cek_alg != CEK_ALG_AES_CTR {
                    return Err(CryptoError::UnsupportedAlgorithm(material.cek_alg).into());
                }
                let key = provider.decrypt_encrypted_key(&material.encrypted_key)?;
                let iv = provider.decrypt_encrypted_iv(&material.encrypted_iv)?;
                let start = content_range.map_or(0, |r| r.start);
                let cipher = provider.make_cipher(&key, &iv, calc_offset(start)?)?;
                builder = builder.cipher(cipher);
            }
            (Some(_), None) => {
                warn!(
                    request_id = %request_id,
                    "object is encrypted but no crypto provider was given, returning ciphertext"
                );
            }
            (None, Some(_)) => {
                info!(request_id = %request_id, "crypto provider given for an unencrypted object");
            }
            (None, None) => {}
        }

        let stream = builder.discard(options.discard).build()?;
        debug!(
            request_id = %request_id,
            content_range = ?content_range,
            content_length = ?content_length,
            stages = ?stream.stages(),
            "object download ready"
        );

        Ok(Self {
            status,
            request_id,
            headers,
            content_range,
            content_length,
            encrypted,
            stream,
        })
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn content_range(&self) -> Option<ContentRange> {
        self.content_range
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Whether the object carries client-side encryption metadata.
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Reads up to `amount` processed bytes, or the rest when `None`.
    pub async fn read(&mut self, amount: Option<usize>) -> io::Result<Bytes> {
        self.stream.read(amount).await
    }

    pub async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        self.stream.next_chunk().await
    }

    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send {
        self.stream.into_stream()
    }

    /// CRC-64 of the bytes received so far, when CRC is enabled.
    pub fn client_crc(&self) -> Option<u64> {
        self.stream.crc()
    }

    /// CRC-64 reported by the service.
    pub fn server_crc(&self) -> Option<u64> {
        self.headers
            .get(OSS_HASH_CRC64_ECMA)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }

    /// Checks the received bytes against the service's CRC-64.
    pub fn verify_crc(&self) -> Result<(), Error> {
        check_crc("get object", self.client_crc(), self.server_crc(), &self.request_id)
    }

    pub fn close(&mut self) {
        self.stream.get_mut().close();
    }
}

fn resolve_provider(
    provider: Arc<dyn CryptoProvider>,
    mat_desc: &MaterialDescription,
) -> Result<Arc<dyn CryptoProvider>, CryptoError> {
    if provider.mat_desc() == mat_desc {
        return Ok(provider);
    }
    warn!(
        object = ?mat_desc,
        provider = ?provider.mat_desc(),
        "material description differs from the provider's, looking up matching materials"
    );
    provider
        .materials_for(mat_desc)
        .ok_or(CryptoError::MaterialMismatch)
}
