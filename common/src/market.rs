//! Engine-facing message types and the shared last-price cache

use crate::types::{ClientId, OrderId, Px, Qty, Side, TickerId};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Kind of a normalized market update delivered to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateKind {
    /// Drop all state for the instrument before a rebuild
    Clear,
    /// Add a price level
    Add,
    /// Replace the quantity at a price level
    Modify,
    /// A trade print
    Trade,
}

/// Normalized market update pushed onto the engine's market-update queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketUpdate {
    /// Update kind
    pub kind: UpdateKind,
    /// Instrument
    pub ticker_id: TickerId,
    /// Book side (meaningless for `Clear`)
    pub side: Side,
    /// Price level or trade price
    pub price: Px,
    /// Level quantity or trade quantity
    pub qty: Qty,
    /// Surrogate identity of the level, derived from its price
    pub order_id: OrderId,
    /// Per-side emission priority, 1 = best
    pub priority: u32,
}

impl MarketUpdate {
    /// A `Clear` update for an instrument
    #[must_use]
    pub const fn clear(ticker_id: TickerId) -> Self {
        Self {
            kind: UpdateKind::Clear,
            ticker_id,
            side: Side::Buy,
            price: Px::INVALID,
            qty: Qty::INVALID,
            order_id: OrderId::INVALID,
            priority: 0,
        }
    }
}

/// Kind of an engine order request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    /// Submit a new order
    New,
    /// Cancel a previously submitted order
    Cancel,
}

/// Order request consumed from the engine's request queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRequest {
    /// Request kind
    pub kind: RequestKind,
    /// Originating engine client
    pub client_id: ClientId,
    /// Instrument
    pub ticker_id: TickerId,
    /// Internal order id, echoed back in every response
    pub order_id: OrderId,
    /// Order side
    pub side: Side,
    /// Limit price
    pub price: Px,
    /// Requested quantity
    pub qty: Qty,
}

/// Kind of an engine order response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseKind {
    /// Order accepted (or still working after a partial fill)
    Accepted,
    /// Order fully filled
    Filled,
    /// Order canceled, expired, or rejected by the exchange
    Canceled,
    /// Request rejected; the universal rejection signal for both new orders
    /// and cancels
    CancelRejected,
}

/// Order response pushed onto the engine's response queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientResponse {
    /// Response kind
    pub kind: ResponseKind,
    /// Engine client the response belongs to
    pub client_id: ClientId,
    /// Instrument
    pub ticker_id: TickerId,
    /// Internal order id from the originating request
    pub client_order_id: OrderId,
    /// Exchange-assigned order id when known, else the internal id
    pub market_order_id: OrderId,
    /// Order side
    pub side: Side,
    /// Order price
    pub price: Px,
    /// Cumulative executed quantity
    pub exec_qty: Qty,
    /// Remaining open quantity
    pub leaves_qty: Qty,
}

/// Last observed market price per instrument.
///
/// The market-data consumer tees every priced ADD/MODIFY emission in here so
/// the order gateway can validate prices without consuming the engine's
/// market-update queue. Trade prints do not feed the cache.
#[derive(Debug, Default)]
pub struct PriceCache {
    prices: Mutex<FxHashMap<TickerId, Px>>,
}

impl PriceCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the price carried by a book update. Only ADD/MODIFY levels
    /// count; trade prints and clears are ignored.
    pub fn observe(&self, update: &MarketUpdate) {
        if !update.ticker_id.is_valid() || !update.price.is_valid() {
            return;
        }
        match update.kind {
            UpdateKind::Add | UpdateKind::Modify => {
                self.prices.lock().insert(update.ticker_id, update.price);
            }
            UpdateKind::Clear | UpdateKind::Trade => {}
        }
    }

    /// Most recent price observed for an instrument
    #[must_use]
    pub fn last_price(&self, ticker_id: TickerId) -> Option<Px> {
        self.prices.lock().get(&ticker_id).copied()
    }
}
