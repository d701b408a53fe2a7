//! Local order book reconstruction for exchange depth streams
//!
//! One book per symbol, rebuilt from REST snapshots and advanced by
//! sequence-validated deltas. A gap, an unsynced delta, or a crossed book
//! flags the book for refresh instead of guessing.

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

pub mod book;

pub use book::{DeltaOutcome, OrderBook};
