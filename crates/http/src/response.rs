use std::io;

use asyncoss_transfer::{CHUNK_SIZE, ChunkSource, ReadFuture, ReadState, SourceCapabilities};
use bytes::Bytes;
use futures_util::stream::{BoxStream, Stream, StreamExt, TryStreamExt};
use reqwest::header::HeaderMap;
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::headers::OSS_REQUEST_ID;

type BodyReader = StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>;

/// A response whose body is read incrementally.
///
/// Status, headers and request id are fixed at construction. The body is
/// single-pass: once it has been read to the end the response latches into
/// [`ReadState::Exhausted`] and further reads return empty chunks.
pub struct Response {
    status: u16,
    headers: HeaderMap,
    request_id: String,
    body: Option<BodyReader>,
    state: ReadState,
}

impl Response {
    /// Wraps a transport response.
    pub fn new(resp: reqwest::Response) -> Self {
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = resp.bytes_stream().map_err(io::Error::other);
        Self::from_parts(status, headers, body)
    }

    /// Builds a response from its parts and a body stream.
    pub fn from_parts<St>(status: u16, headers: HeaderMap, body: St) -> Self
    where
        St: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        let request_id = headers
            .get(OSS_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        debug!(request_id = %request_id, status, headers = ?headers, "response received");

        Self {
            status,
            headers,
            request_id,
            body: Some(StreamReader::new(body.boxed())),
            state: ReadState::Open,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Value of the `x-oss-request-id` header, empty when absent.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// A header value, if present and valid ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn state(&self) -> ReadState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.body.is_none()
    }

    /// Reads up to `amount` bytes, or the whole remaining body when `None`.
    ///
    /// A bounded read returns at most [`CHUNK_SIZE`] bytes.
    ///
    /// After the body is exhausted every call returns an empty chunk. Reading
    /// a response that was closed before reaching the end is an error.
    pub async fn read(&mut self, amount: Option<usize>) -> io::Result<Bytes> {
        if self.state == ReadState::Exhausted || amount == Some(0) {
            return Ok(Bytes::new());
        }
        let body = self
            .body
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "response closed"))?;

        match amount {
            None => {
                let mut buf = Vec::new();
                body.read_to_end(&mut buf).await?;
                self.state = ReadState::Exhausted;
                Ok(Bytes::from(buf))
            }
            Some(n) => {
                let mut buf = vec![0u8; n.min(CHUNK_SIZE)];
                let got = body.read(&mut buf).await?;
                if got == 0 {
                    self.state = ReadState::Exhausted;
                }
                buf.truncate(got);
                Ok(Bytes::from(buf))
            }
        }
    }

    /// Releases the body. Safe to call any number of times.
    pub fn close(&mut self) {
        if self.body.take().is_some() {
            debug!(request_id = %self.request_id, "response closed");
        }
    }

    /// Consumes the response into a stream of [`CHUNK_SIZE`] chunks.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send {
        futures_util::stream::unfold(Some(self), |resp| async move {
            let mut resp = resp?;
            match resp.read(Some(CHUNK_SIZE)).await {
                Ok(chunk) if chunk.is_empty() => None,
                Ok(chunk) => Some((Ok(chunk), Some(resp))),
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

impl ChunkSource for Response {
    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::file_like()
    }

    fn read(&mut self, amount: Option<usize>) -> ReadFuture<'_> {
        Box::pin(Response::read(self, amount))
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("request_id", &self.request_id)
            .field("state", &self.state)
            .field("closed", &self.body.is_none())
            .finish()
    }
}
