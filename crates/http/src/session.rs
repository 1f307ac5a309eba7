use std::collections::HashMap;
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::header::{CONTENT_LENGTH, HeaderValue};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{Error, RequestError};
use crate::request::Request;
use crate::response::Response;

/// Pooled HTTP transport shared by concurrent requests.
///
/// One connection pool exists per proxy setting. Pools are built lazily on
/// first use and dropped after a transport failure so the next request
/// starts from fresh connections.
pub struct Session {
    config: SessionConfig,
    clients: Mutex<HashMap<Option<String>, reqwest::Client>>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Sends `req` and returns the response with its body unread.
    ///
    /// The request body is read to the end first, running any checksum,
    /// progress or cipher stages attached to it. Errors reading the body and
    /// transport failures are both reported as [`RequestError`]; the latter
    /// also reset the connection pools.
    pub async fn do_request(&self, req: Request, timeout: Duration) -> Result<Response, Error> {
        let Request {
            method,
            url,
            params,
            mut headers,
            body,
            proxy,
        } = req;
        let proxy = proxy.or_else(|| self.config.proxy.clone());

        debug!(
            method = %method,
            url = %url,
            timeout_secs = timeout.as_secs_f64(),
            proxy = ?proxy,
            "sending request"
        );

        let data = match body {
            Some(mut adapter) => {
                let size = adapter.size();
                let data = adapter.read(None).await.map_err(RequestError::Io)?;
                if let Some(size) = size {
                    if data.len() as u64 != size {
                        return Err(RequestError::Io(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("body ended after {} of {size} bytes", data.len()),
                        ))
                        .into());
                    }
                    headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
                }
                Some(data)
            }
            None => None,
        };

        let client = self.client(proxy.as_deref())?;
        let mut builder = client.request(method, &url).headers(headers).timeout(timeout);
        if !params.is_empty() {
            builder = builder.query(&params);
        }
        if let Some(data) = data {
            builder = builder.body(data);
        }

        match builder.send().await {
            Ok(resp) => Ok(Response::new(resp)),
            Err(e) => {
                warn!(url = %url, error = %e, "request failed");
                self.reset_pool();
                Err(RequestError::Transport(e).into())
            }
        }
    }

    /// Drops every pooled connection. Later requests rebuild the pools.
    pub fn reset_pool(&self) {
        let mut clients = self.lock_clients();
        if !clients.is_empty() {
            info!(pools = clients.len(), "resetting connection pools");
            clients.clear();
        }
    }

    /// Releases the pooled connections.
    pub fn close(&self) {
        self.reset_pool();
    }

    /// Number of connection pools currently alive.
    pub fn pooled_clients(&self) -> usize {
        self.lock_clients().len()
    }

    fn client(&self, proxy: Option<&str>) -> Result<reqwest::Client, Error> {
        let mut clients = self.lock_clients();
        let key = proxy.map(str::to_string);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(self.config.connection_pool_size)
            .connect_timeout(self.config.connect_timeout());
        builder = match proxy {
            Some(url) => builder.proxy(reqwest::Proxy::all(url).map_err(RequestError::Transport)?),
            None => builder.no_proxy(),
        };
        let client = builder.build().map_err(RequestError::Transport)?;

        debug!(
            proxy = ?proxy,
            pool_size = self.config.connection_pool_size,
            "connection pool created"
        );
        clients.insert(key, client.clone());
        Ok(client)
    }

    fn lock_clients(&self) -> MutexGuard<'_, HashMap<Option<String>, reqwest::Client>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use asyncoss_transfer::ByteSource;
    use bytes::Bytes;
    use reqwest::Method;
    use reqwest::header::HeaderMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    use std::io::Write;

    use super::*;

    /// Reads one HTTP/1.1 request (headers plus a `Content-Length` body).
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let head_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed before sending headers");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
        let body_len = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .map(|v| v.trim().parse::<usize>().unwrap())
            .unwrap_or(0);
        while buf.len() < head_end + body_len {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0);
            buf.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Serves one canned response per connection, returning the raw requests.
    async fn mock_server(responses: Vec<String>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for response in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                requests.push(read_request(&mut stream).await);
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.unwrap();
            }
            requests
        });
        (url, handle)
    }

    fn http_response(headers: &[(&str, &str)], body: &str) -> String {
        let mut out = String::from("HTTP/1.1 200 OK\r\n");
        for (name, value) in headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ));
        out
    }

    fn request(method: Method, url: &str) -> Request {
        Request::new(method, url, HeaderMap::new(), "tests").unwrap()
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn get_returns_status_request_id_and_body() {
        let (url, server) = mock_server(vec![http_response(
            &[("x-oss-request-id", "req-1")],
            "hello",
        )])
        .await;

        let session = Session::default();
        let mut resp = session
            .do_request(request(Method::GET, &format!("{url}/bucket/key")), TIMEOUT)
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        assert_eq!(resp.request_id(), "req-1");
        assert_eq!(resp.read(None).await.unwrap(), &b"hello"[..]);
        assert!(resp.read(None).await.unwrap().is_empty());

        let raw = server.await.unwrap().remove(0);
        assert!(raw.starts_with("GET /bucket/key HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn put_sends_materialized_body_and_headers() {
        let (url, server) = mock_server(vec![http_response(&[], "")]).await;

        let req = request(Method::PUT, &format!("{url}/key"))
            .with_params([("partNumber", "1")])
            .with_body(ByteSource::chunks(vec![b"abc".to_vec(), b"def".to_vec()]))
            .unwrap();
        let session = Session::default();
        session.do_request(req, TIMEOUT).await.unwrap();

        let raw = server.await.unwrap().remove(0);
        let lower = raw.to_lowercase();
        assert!(raw.starts_with("PUT /key?partNumber=1 HTTP/1.1\r\n"));
        assert!(lower.contains("content-length: 6\r\n"));
        assert!(lower.contains("accept-encoding: \r\n"));
        assert!(lower.contains("user-agent: asyncoss/"));
        assert!(raw.ends_with("\r\n\r\nabcdef"));
    }

    #[tokio::test]
    async fn sized_body_sets_content_length() {
        let (url, server) = mock_server(vec![http_response(&[], "")]).await;

        let req = request(Method::PUT, &format!("{url}/key"))
            .with_body(Bytes::from_static(b"0123456789"))
            .unwrap();
        Session::default().do_request(req, TIMEOUT).await.unwrap();

        let raw = server.await.unwrap().remove(0);
        assert!(raw.to_lowercase().contains("content-length: 10\r\n"));
        assert!(raw.ends_with("0123456789"));
    }

    #[tokio::test]
    async fn pool_is_created_lazily_and_reused() {
        let (url, server) = mock_server(vec![http_response(&[], "a"), http_response(&[], "b")]).await;

        let session = Session::default();
        assert_eq!(session.pooled_clients(), 0);
        for _ in 0..2 {
            let mut resp = session
                .do_request(request(Method::GET, &format!("{url}/k")), TIMEOUT)
                .await
                .unwrap();
            resp.read(None).await.unwrap();
        }
        assert_eq!(session.pooled_clients(), 1);
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn transport_failure_resets_pool() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let session = Session::default();
        let result = session
            .do_request(request(Method::GET, &format!("http://{addr}/k")), TIMEOUT)
            .await;

        assert!(matches!(
            result,
            Err(Error::Request(RequestError::Transport(_)))
        ));
        assert_eq!(session.pooled_clients(), 0);
    }

    #[tokio::test]
    async fn body_read_failure_is_request_io_error() {
        let broken = ByteSource::stream(futures_util::stream::iter(vec![Err(io::Error::other(
            "disk gone",
        ))]));
        let req = request(Method::PUT, "http://127.0.0.1:1/k")
            .with_body(broken)
            .unwrap();

        let session = Session::default();
        let result = session.do_request(req, TIMEOUT).await;
        assert!(matches!(result, Err(Error::Request(RequestError::Io(_)))));
        assert_eq!(session.pooled_clients(), 0);
    }

    #[tokio::test]
    async fn file_body_is_sent_with_its_length() {
        let (url, server) = mock_server(vec![http_response(&[], "")]).await;
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"file contents").unwrap();
        tmp.flush().unwrap();

        let req = request(Method::PUT, &format!("{url}/key"))
            .with_body(ByteSource::open(tmp.path()).await.unwrap())
            .unwrap();
        Session::default().do_request(req, TIMEOUT).await.unwrap();

        let raw = server.await.unwrap().remove(0);
        assert!(raw.to_lowercase().contains("content-length: 13\r\n"));
        assert!(raw.ends_with("\r\n\r\nfile contents"));
    }

    #[tokio::test]
    async fn file_truncated_after_open_is_request_io_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        tmp.flush().unwrap();
        let source = ByteSource::open(tmp.path()).await.unwrap();
        tmp.as_file().set_len(4).unwrap();

        let req = request(Method::PUT, "http://127.0.0.1:1/k")
            .with_body(source)
            .unwrap();
        let session = Session::default();
        match session.do_request(req, TIMEOUT).await {
            Err(Error::Request(RequestError::Io(e))) => {
                assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof);
            }
            other => panic!("expected a short-body io error, got {other:?}"),
        }
        assert_eq!(session.pooled_clients(), 0);
    }

    #[tokio::test]
    async fn caller_accept_encoding_reaches_the_wire() {
        let (url, server) = mock_server(vec![http_response(&[], "")]).await;
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip"),
        );
        let req = Request::new(Method::GET, format!("{url}/key"), headers, "tests").unwrap();
        Session::default().do_request(req, TIMEOUT).await.unwrap();

        let raw = server.await.unwrap().remove(0);
        assert!(raw.to_lowercase().contains("accept-encoding: gzip\r\n"));
    }

    #[test]
    fn close_drops_pools() {
        let session = Session::default();
        session.client(None).unwrap();
        session.client(Some("http://127.0.0.1:3128")).unwrap();
        assert_eq!(session.pooled_clients(), 2);
        session.close();
        session.close();
        assert_eq!(session.pooled_clients(), 0);
    }
}
