//! Single-shot blocking HTTPS client
//!
//! One logical request per call: the wall-clock timeout covers resolution,
//! connect, TLS handshake, write, and read. The client never retries;
//! callers own retry policy.

use crate::error::{NetError, NetResult};
use reqwest::Method;
use std::time::Duration;
use tracing::debug;

/// Default per-request wall-clock timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Blocking HTTPS client for exchange REST calls
pub struct HttpClient {
    client: reqwest::blocking::Client,
}

impl HttpClient {
    /// Build a client. Connections are not pooled so every request gets a
    /// fresh TCP + TLS session, mirroring `Connection: close` semantics.
    pub fn new() -> NetResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| NetError::Transport(format!("building http client: {e}")))?;
        Ok(Self { client })
    }

    /// Issue one request against `https://{host}{target}` and return the
    /// response body on 2xx
    #[allow(clippy::too_many_arguments)]
    pub fn request(
        &self,
        method: Method,
        host: &str,
        target: &str,
        query: &[(String, String)],
        headers: &[(String, String)],
        body: Option<String>,
        timeout: Duration,
    ) -> NetResult<String> {
        let url = format!("https://{host}{target}");
        debug!(%method, %url, "http request");
        let mut builder = self.client.request(method, &url).timeout(timeout);
        if !query.is_empty() {
            builder = builder.query(query);
        }
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }
        let response = builder.send().map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(timeout)
            } else {
                NetError::Transport(e.to_string())
            }
        })?;
        let status = response.status();
        let text = response.text().map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(timeout)
            } else {
                NetError::Transport(e.to_string())
            }
        })?;
        if status.is_success() {
            Ok(text)
        } else {
            Err(NetError::HttpStatus {
                code: status.as_u16(),
                body: text,
            })
        }
    }

    /// GET with the default timeout
    pub fn get(
        &self,
        host: &str,
        target: &str,
        query: &[(String, String)],
        headers: &[(String, String)],
    ) -> NetResult<String> {
        self.request(Method::GET, host, target, query, headers, None, DEFAULT_TIMEOUT)
    }

    /// POST with the default timeout
    pub fn post(
        &self,
        host: &str,
        target: &str,
        query: &[(String, String)],
        headers: &[(String, String)],
        body: Option<String>,
    ) -> NetResult<String> {
        self.request(Method::POST, host, target, query, headers, body, DEFAULT_TIMEOUT)
    }

    /// PUT with the default timeout
    pub fn put(
        &self,
        host: &str,
        target: &str,
        query: &[(String, String)],
        headers: &[(String, String)],
    ) -> NetResult<String> {
        self.request(Method::PUT, host, target, query, headers, None, DEFAULT_TIMEOUT)
    }

    /// DELETE with the default timeout
    pub fn delete(
        &self,
        host: &str,
        target: &str,
        query: &[(String, String)],
        headers: &[(String, String)],
    ) -> NetResult<String> {
        self.request(Method::DELETE, host, target, query, headers, None, DEFAULT_TIMEOUT)
    }
}
