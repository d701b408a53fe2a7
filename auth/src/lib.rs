//! Authentication for the exchange REST and WebSocket APIs
//!
//! Credentials are loaded once from a JSON vault file and never mutated, so
//! a [`Signer`] can be shared by reference between the order gateway and the
//! user-data stream without locking.

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

pub mod signer;

pub use signer::{AuthError, Signer};
