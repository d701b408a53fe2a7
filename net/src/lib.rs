//! Exchange transport: blocking HTTP, persistent WebSocket, rate limiting
//!
//! HTTP requests are single-shot and fully blocking on the calling thread;
//! they must never be issued from a WebSocket I/O thread. Each WebSocket
//! client owns one I/O thread with its own event loop; message and status
//! callbacks run there and must not block.

#![deny(warnings)]
#![deny(clippy::all)]

pub mod backoff;
pub mod error;
pub mod http;
pub mod rate;
pub mod ws;

pub use error::{NetError, NetResult};
pub use http::{HttpClient, DEFAULT_TIMEOUT};
pub use rate::RateLimiter;
pub use reqwest::Method;
pub use ws::{MessageCallback, StatusCallback, WsClient};
