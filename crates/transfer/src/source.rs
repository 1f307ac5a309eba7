use std::fmt;
use std::future::Future;
use std::io;
use std::io::SeekFrom;
use std::path::Path;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures_util::stream::{BoxStream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};

use crate::CHUNK_SIZE;

/// Future returned by [`ChunkSource::read`].
pub type ReadFuture<'a> = Pin<Box<dyn Future<Output = io::Result<Bytes>> + Send + 'a>>;

/// What a source can do, declared once when it is handed to an adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceCapabilities {
    /// Exact number of bytes the source will yield, when known upfront.
    pub size: Option<u64>,
    /// Supports bounded reads of arbitrary length.
    pub readable: bool,
    /// Yields chunks of its own choosing.
    pub iterable: bool,
}

impl SourceCapabilities {
    /// Capabilities of a source with a known length.
    pub fn sized(size: u64) -> Self {
        Self {
            size: Some(size),
            readable: true,
            iterable: true,
        }
    }

    /// Capabilities of a readable source of unknown length.
    pub fn file_like() -> Self {
        Self {
            size: None,
            readable: true,
            iterable: false,
        }
    }

    /// Capabilities of a chunk iterator.
    pub fn iterable() -> Self {
        Self {
            size: None,
            readable: false,
            iterable: true,
        }
    }

    /// Picks the adapter shape for these capabilities.
    ///
    /// A known size wins over readability, which wins over iteration.
    pub fn resolve(&self) -> Option<SourceKind> {
        if let Some(size) = self.size {
            Some(SourceKind::Sized(size))
        } else if self.readable {
            Some(SourceKind::FileLike)
        } else if self.iterable {
            Some(SourceKind::Iterable)
        } else {
            None
        }
    }
}

/// Adapter shape resolved from [`SourceCapabilities`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// In-memory buffer or seekable file with a known length.
    Sized(u64),
    /// Readable stream of unknown length (e.g. a response body).
    FileLike,
    /// Generic chunk iterator.
    Iterable,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Sized(_) => f.write_str("bytes or file object"),
            SourceKind::FileLike => f.write_str("file-like"),
            SourceKind::Iterable => f.write_str("iterator"),
        }
    }
}

/// A byte source that can be read incrementally.
///
/// `read(Some(n))` returns at most `n` bytes, `read(None)` returns everything
/// left. An empty result means the source is exhausted.
pub trait ChunkSource: Send {
    /// Declares the source's capabilities.
    fn capabilities(&self) -> SourceCapabilities;

    /// Reads the next chunk.
    fn read(&mut self, amount: Option<usize>) -> ReadFuture<'_>;
}

/// Request or upload body source.
pub struct ByteSource {
    inner: Inner,
}

enum Inner {
    Buffer {
        data: Bytes,
        pos: usize,
    },
    File {
        file: tokio::fs::File,
        size: u64,
        remaining: u64,
    },
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    Iter {
        stream: BoxStream<'static, io::Result<Bytes>>,
        pending: Bytes,
    },
}

impl ByteSource {
    /// Wraps an in-memory buffer.
    pub fn buffer(data: impl Into<Bytes>) -> Self {
        Self {
            inner: Inner::Buffer {
                data: data.into(),
                pos: 0,
            },
        }
    }

    /// An empty body.
    pub fn empty() -> Self {
        Self::buffer(Bytes::new())
    }

    /// Wraps an open file, covering the bytes from its current position to EOF.
    ///
    /// A file that was partially read or seeked reports only what is left,
    /// so `Content-Length` stays correct.
    pub async fn from_file(mut file: tokio::fs::File) -> io::Result<Self> {
        let len = file.metadata().await?.len();
        let pos = file.seek(SeekFrom::Current(0)).await?;
        let size = len.saturating_sub(pos);
        Ok(Self {
            inner: Inner::File {
                file,
                size,
                remaining: size,
            },
        })
    }

    /// Opens `path` and wraps the whole file.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        Self::from_file(file).await
    }

    /// Wraps an async reader of unknown length.
    pub fn reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            inner: Inner::Reader(Box::new(reader)),
        }
    }

    /// Wraps a stream of chunks.
    pub fn stream<St>(stream: St) -> Self
    where
        St: futures_util::Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: Inner::Iter {
                stream: stream.boxed(),
                pending: Bytes::new(),
            },
        }
    }

    /// Wraps an iterator of in-memory chunks.
    pub fn chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        I::IntoIter: Send + 'static,
        B: Into<Bytes>,
    {
        Self::stream(futures_util::stream::iter(
            chunks.into_iter().map(|chunk| Ok(chunk.into())),
        ))
    }
}

impl fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Buffer { data, pos } => f
                .debug_struct("Buffer")
                .field("len", &data.len())
                .field("pos", pos)
                .finish(),
            Inner::File { size, remaining, .. } => f
                .debug_struct("File")
                .field("size", size)
                .field("remaining", remaining)
                .finish(),
            Inner::Reader(_) => f.write_str("Reader"),
            Inner::Iter { pending, .. } => f
                .debug_struct("Iter")
                .field("pending", &pending.len())
                .finish(),
        }
    }
}

impl From<Bytes> for ByteSource {
    fn from(data: Bytes) -> Self {
        Self::buffer(data)
    }
}

impl From<Vec<u8>> for ByteSource {
    fn from(data: Vec<u8>) -> Self {
        Self::buffer(data)
    }
}

impl From<&'static [u8]> for ByteSource {
    fn from(data: &'static [u8]) -> Self {
        Self::buffer(data)
    }
}

impl From<String> for ByteSource {
    fn from(data: String) -> Self {
        Self::buffer(data)
    }
}

impl ChunkSource for ByteSource {
    fn capabilities(&self) -> SourceCapabilities {
        match &self.inner {
            Inner::Buffer { data, .. } => SourceCapabilities::sized(data.len() as u64),
            Inner::File { size, .. } => SourceCapabilities::sized(*size),
            Inner::Reader(_) => SourceCapabilities::file_like(),
            Inner::Iter { .. } => SourceCapabilities::iterable(),
        }
    }

    fn read(&mut self, amount: Option<usize>) -> ReadFuture<'_> {
        Box::pin(async move {
            match &mut self.inner {
                Inner::Buffer { data, pos } => {
                    let left = data.len() - *pos;
                    let n = amount.map_or(left, |a| a.min(left));
                    let chunk = data.slice(*pos..*pos + n);
                    *pos += n;
                    Ok(chunk)
                }
                Inner::File {
                    file, remaining, ..
                } => {
                    let n = amount.map_or(*remaining, |a| (a as u64).min(*remaining));
                    let mut buf = Vec::with_capacity(n.min(CHUNK_SIZE as u64) as usize);
                    (&mut *file).take(n).read_to_end(&mut buf).await?;
                    if (buf.len() as u64) < n {
                        // Truncated underneath us; report what exists and stop.
                        *remaining = 0;
                    } else {
                        *remaining -= n;
                    }
                    Ok(Bytes::from(buf))
                }
                Inner::Reader(reader) => match amount {
                    None => {
                        let mut buf = Vec::new();
                        reader.read_to_end(&mut buf).await?;
                        Ok(Bytes::from(buf))
                    }
                    Some(n) => {
                        let mut buf = vec![0u8; n.min(CHUNK_SIZE)];
                        let got = reader.read(&mut buf).await?;
                        buf.truncate(got);
                        Ok(Bytes::from(buf))
                    }
                },
                Inner::Iter { stream, pending } => match amount {
                    None => {
                        let mut all = BytesMut::from(&pending[..]);
                        *pending = Bytes::new();
                        while let Some(chunk) = stream.next().await {
                            all.extend_from_slice(&chunk?);
                        }
                        Ok(all.freeze())
                    }
                    Some(n) => {
                        while pending.is_empty() {
                            match stream.next().await {
                                Some(chunk) => *pending = chunk?,
                                None => return Ok(Bytes::new()),
                            }
                        }
                        let take = n.min(pending.len());
                        Ok(pending.split_to(take))
                    }
                },
            }
        })
    }
}
