//! Transport error taxonomy

use std::time::Duration;
use thiserror::Error;

/// Transport-layer failures
#[derive(Debug, Error)]
pub enum NetError {
    /// DNS, connect, TLS, read, or write failure; recoverable by retry or
    /// reconnect
    #[error("transport error: {0}")]
    Transport(String),

    /// A wall-clock bound was exceeded
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The server answered with a non-2xx status
    #[error("http status {code}: {body}")]
    HttpStatus {
        /// HTTP status code
        code: u16,
        /// Response body, verbatim
        body: String,
    },

    /// The peer violated the expected protocol
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl NetError {
    /// Whether this failure is a rate-limit response (HTTP 429/418),
    /// transient by policy
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::HttpStatus { code: 429 | 418, .. })
    }
}

/// Transport result alias
pub type NetResult<T> = Result<T, NetError>;
