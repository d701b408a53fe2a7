//! Per-symbol order book with snapshot/delta reconciliation

use common::{MarketUpdate, OrderId, Px, Qty, Side, TickerId, UpdateKind};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Result of applying a depth delta
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// Delta applied; `last_update_id` advanced
    Applied,
    /// Delta predates the current state; discarded silently
    Stale,
    /// No snapshot has been applied yet; delta dropped, refresh requested
    NotSynced,
    /// Sequence gap detected; delta dropped, refresh requested
    Gap,
    /// Applying the delta crossed the book; state invalidated, refresh
    /// requested
    Crossed,
}

/// Price-level book for a single symbol.
///
/// Levels are keyed by price ticks; zero-quantity levels are deletions and
/// are never stored. Mutations are serialized by the owner's lock.
#[derive(Debug, Clone)]
pub struct OrderBook {
    symbol: String,
    ticker_id: TickerId,
    bids: BTreeMap<i64, Qty>,
    asks: BTreeMap<i64, Qty>,
    last_update_id: u64,
    is_valid: bool,
    needs_refresh: bool,
}

impl OrderBook {
    /// Create an empty, not-yet-synchronized book
    #[must_use]
    pub fn new(symbol: impl Into<String>, ticker_id: TickerId) -> Self {
        Self {
            symbol: symbol.into(),
            ticker_id,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_id: 0,
            is_valid: false,
            needs_refresh: false,
        }
    }

    /// Exchange symbol this book tracks
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Instrument id this book tracks
    #[must_use]
    pub const fn ticker_id(&self) -> TickerId {
        self.ticker_id
    }

    /// Highest update id incorporated so far
    #[must_use]
    pub const fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    /// Whether a snapshot has been applied and no gap has invalidated it
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.is_valid
    }

    /// Whether a gap or disconnect requires a fresh snapshot
    #[must_use]
    pub const fn needs_refresh(&self) -> bool {
        self.needs_refresh
    }

    /// Request a refresh (used on transport disconnects)
    pub fn mark_needs_refresh(&mut self) {
        self.needs_refresh = true;
    }

    /// Replace all state from a REST snapshot. Zero-quantity rows are
    /// ignored. Returns false when the snapshot itself is crossed.
    pub fn apply_snapshot(
        &mut self,
        last_update_id: u64,
        bids: &[(Px, Qty)],
        asks: &[(Px, Qty)],
    ) -> bool {
        self.bids.clear();
        self.asks.clear();
        for &(price, qty) in bids {
            if price.is_valid() && qty.is_valid() && qty > Qty::ZERO {
                self.bids.insert(price.as_ticks(), qty);
            }
        }
        for &(price, qty) in asks {
            if price.is_valid() && qty.is_valid() && qty > Qty::ZERO {
                self.asks.insert(price.as_ticks(), qty);
            }
        }
        self.last_update_id = self.last_update_id.max(last_update_id);
        if self.is_crossed() {
            warn!(symbol = %self.symbol, "snapshot produced a crossed book");
            self.is_valid = false;
            self.needs_refresh = true;
            return false;
        }
        self.is_valid = true;
        self.needs_refresh = false;
        debug!(
            symbol = %self.symbol,
            last_update_id,
            bids = self.bids.len(),
            asks = self.asks.len(),
            "snapshot applied"
        );
        true
    }

    /// Apply a depth delta covering update ids `[first_id, final_id]`
    pub fn apply_delta(
        &mut self,
        first_id: u64,
        final_id: u64,
        bids: &[(Px, Qty)],
        asks: &[(Px, Qty)],
    ) -> DeltaOutcome {
        if !self.is_valid {
            self.needs_refresh = true;
            return DeltaOutcome::NotSynced;
        }
        if final_id < self.last_update_id + 1 {
            return DeltaOutcome::Stale;
        }
        if first_id > self.last_update_id + 1 {
            warn!(
                symbol = %self.symbol,
                first_id,
                expected = self.last_update_id + 1,
                "sequence gap detected"
            );
            self.needs_refresh = true;
            return DeltaOutcome::Gap;
        }
        apply_levels(&mut self.bids, bids);
        apply_levels(&mut self.asks, asks);
        self.last_update_id = final_id;
        if self.is_crossed() {
            warn!(symbol = %self.symbol, "delta crossed the book");
            self.is_valid = false;
            self.needs_refresh = true;
            return DeltaOutcome::Crossed;
        }
        DeltaOutcome::Applied
    }

    /// Emit a CLEAR followed by one ADD per level: bids best-first, then
    /// asks best-first, each tagged with a per-side priority starting at 1.
    /// The level's order id is derived from its price.
    pub fn generate_updates(&self, out: &mut Vec<MarketUpdate>) {
        if !self.is_valid {
            return;
        }
        out.push(MarketUpdate::clear(self.ticker_id));
        let mut priority = 1u32;
        for (&ticks, &qty) in self.bids.iter().rev() {
            out.push(self.level_update(Side::Buy, ticks, qty, priority));
            priority += 1;
        }
        priority = 1;
        for (&ticks, &qty) in self.asks.iter() {
            out.push(self.level_update(Side::Sell, ticks, qty, priority));
            priority += 1;
        }
    }

    /// Best bid price, or the invalid sentinel
    #[must_use]
    pub fn best_bid(&self) -> Px {
        if !self.is_valid {
            return Px::INVALID;
        }
        self.bids
            .keys()
            .next_back()
            .map_or(Px::INVALID, |&t| Px::from_ticks(t))
    }

    /// Best ask price, or the invalid sentinel
    #[must_use]
    pub fn best_ask(&self) -> Px {
        if !self.is_valid {
            return Px::INVALID;
        }
        self.asks
            .keys()
            .next()
            .map_or(Px::INVALID, |&t| Px::from_ticks(t))
    }

    /// Quantity resting at a price, or the invalid sentinel when the book is
    /// not valid or the level is absent
    #[must_use]
    pub fn qty_at(&self, price: Px, side: Side) -> Qty {
        if !self.is_valid || !price.is_valid() {
            return Qty::INVALID;
        }
        let levels = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        levels
            .get(&price.as_ticks())
            .copied()
            .unwrap_or(Qty::INVALID)
    }

    fn level_update(&self, side: Side, ticks: i64, qty: Qty, priority: u32) -> MarketUpdate {
        MarketUpdate {
            kind: UpdateKind::Add,
            ticker_id: self.ticker_id,
            side,
            price: Px::from_ticks(ticks),
            qty,
            order_id: OrderId::new(ticks.unsigned_abs()),
            priority,
        }
    }

    fn is_crossed(&self) -> bool {
        match (self.bids.keys().next_back(), self.asks.keys().next()) {
            (Some(&bid), Some(&ask)) => bid >= ask,
            _ => false,
        }
    }
}

fn apply_levels(levels: &mut BTreeMap<i64, Qty>, updates: &[(Px, Qty)]) {
    for &(price, qty) in updates {
        if !price.is_valid() || !qty.is_valid() {
            continue;
        }
        if qty > Qty::ZERO {
            levels.insert(price.as_ticks(), qty);
        } else {
            levels.remove(&price.as_ticks());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: f64, qty: f64) -> (Px, Qty) {
        (Px::new(price), Qty::new(qty))
    }

    #[test]
    fn delta_before_snapshot_is_dropped_not_synced() {
        let mut book = OrderBook::new("BTCUSDT", TickerId::new(1));
        let outcome = book.apply_delta(1, 2, &[level(10.0, 1.0)], &[]);
        assert_eq!(outcome, DeltaOutcome::NotSynced);
        assert!(book.needs_refresh());
        assert!(!book.is_valid());
    }

    #[test]
    fn crossed_delta_invalidates_the_book() {
        let mut book = OrderBook::new("BTCUSDT", TickerId::new(1));
        book.apply_snapshot(100, &[level(10.0, 1.0)], &[level(10.5, 2.0)]);
        let outcome = book.apply_delta(101, 101, &[level(10.6, 1.0)], &[]);
        assert_eq!(outcome, DeltaOutcome::Crossed);
        assert!(!book.is_valid());
        assert!(book.needs_refresh());
        assert_eq!(book.best_bid(), Px::INVALID);
    }

    #[test]
    fn crossed_snapshot_is_rejected() {
        let mut book = OrderBook::new("BTCUSDT", TickerId::new(1));
        assert!(!book.apply_snapshot(5, &[level(11.0, 1.0)], &[level(10.5, 2.0)]));
        assert!(!book.is_valid());
        assert!(book.needs_refresh());
    }

    #[test]
    fn zero_quantity_snapshot_rows_are_ignored() {
        let mut book = OrderBook::new("BTCUSDT", TickerId::new(1));
        book.apply_snapshot(7, &[level(10.0, 0.0), level(9.9, 1.0)], &[level(10.5, 2.0)]);
        assert_eq!(book.best_bid(), Px::new(9.9));
        assert_eq!(book.qty_at(Px::new(10.0), Side::Buy), Qty::INVALID);
    }

    #[test]
    fn queries_on_invalid_book_return_sentinels() {
        let book = OrderBook::new("BTCUSDT", TickerId::new(1));
        assert_eq!(book.best_bid(), Px::INVALID);
        assert_eq!(book.best_ask(), Px::INVALID);
        assert_eq!(book.qty_at(Px::new(10.0), Side::Sell), Qty::INVALID);
    }
}
