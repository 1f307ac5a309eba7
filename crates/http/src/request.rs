use asyncoss_transfer::{ByteSource, ChunkAdapter, ConfigError};
use reqwest::Method;
use reqwest::header::{ACCEPT_ENCODING, HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::error::Error;

/// One request handed to [`Session::do_request`](crate::Session::do_request).
///
/// URL and headers come already built and signed; this layer only delivers
/// them.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<ChunkAdapter>,
    /// Overrides the session proxy for this request.
    pub proxy: Option<String>,
}

impl Request {
    /// Creates a request, filling in the headers the service expects.
    ///
    /// Unless the caller set them, `Accept-Encoding` is sent empty so bodies
    /// arrive uncompressed and CRC checks see the stored bytes, and
    /// `User-Agent` names this library.
    pub fn new(
        method: Method,
        url: impl Into<String>,
        mut headers: HeaderMap,
        app_name: &str,
    ) -> Result<Self, Error> {
        let url = url.into();

        if !headers.contains_key(ACCEPT_ENCODING) {
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(""));
        }
        if !headers.contains_key(USER_AGENT) {
            let agent = user_agent(app_name);
            let value = HeaderValue::from_str(&agent).map_err(|_| Error::InvalidHeader {
                name: USER_AGENT.to_string(),
                value: agent.clone(),
            })?;
            headers.insert(USER_AGENT, value);
        }

        debug!(method = %method, url = %url, headers = ?headers, "request built");

        Ok(Self {
            method,
            url,
            params: Vec::new(),
            headers,
            body: None,
            proxy: None,
        })
    }

    /// Adds query parameters.
    pub fn with_params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the body from any byte source.
    pub fn with_body(self, source: impl Into<ByteSource>) -> Result<Self, ConfigError> {
        Ok(self.with_adapter(ChunkAdapter::new(source.into())?))
    }

    /// Sets a body that already carries its processing stages.
    pub fn with_adapter(mut self, adapter: ChunkAdapter) -> Self {
        self.body = Some(adapter);
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }
}

/// `asyncoss/<version>(<os>/<arch>;rust)[/<app>]`
pub fn user_agent(app_name: &str) -> String {
    let base = format!(
        "asyncoss/{}({}/{};rust)",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    if app_name.is_empty() {
        base
    } else {
        format!("{base}/{app_name}")
    }
}
