//! Common types and utilities for the exchange connectivity core

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod instrument;
pub mod market;
pub mod types;

pub use config::{CacheSettings, ConfigError, OrderGatewayConfig, TradingConfig};
pub use instrument::{TickerInfo, TickerRegistry};
pub use market::{
    ClientRequest, ClientResponse, MarketUpdate, PriceCache, RequestKind, ResponseKind, UpdateKind,
};
pub use types::{ClientId, OrderId, Px, Qty, Side, TickerId, Ts, SCALE};
