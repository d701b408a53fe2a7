//! Instrument registry mapping internal ticker ids to exchange symbols

use crate::types::TickerId;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Per-instrument configuration loaded once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerInfo {
    /// Internal instrument id
    pub ticker_id: u32,
    /// Exchange symbol, e.g. `BTCUSDT`
    pub symbol: String,
    /// Base asset, e.g. `BTC`
    pub base_asset: String,
    /// Quote asset, e.g. `USDT`
    pub quote_asset: String,
    /// Minimum order quantity
    #[serde(default = "default_min_qty")]
    pub min_qty: f64,
    /// Maximum order quantity
    #[serde(default = "default_max_qty")]
    pub max_qty: f64,
    /// Quantity increment
    #[serde(default = "default_step_size")]
    pub step_size: f64,
    /// Minimum permitted `price * qty`
    #[serde(default = "default_min_notional")]
    pub min_notional: f64,
    /// Decimal places for price formatting
    #[serde(default = "default_price_precision")]
    pub price_precision: u32,
    /// Decimal places for quantity formatting
    #[serde(default = "default_qty_precision")]
    pub qty_precision: u32,
    /// Reference price for test orders
    #[serde(default = "default_test_price")]
    pub test_price: f64,
    /// Testnet per-symbol quantity ceiling
    #[serde(default = "default_test_qty")]
    pub test_qty: f64,
}

fn default_min_qty() -> f64 {
    0.000_01
}
fn default_max_qty() -> f64 {
    9_000.0
}
fn default_step_size() -> f64 {
    0.000_01
}
fn default_min_notional() -> f64 {
    5.0
}
fn default_price_precision() -> u32 {
    2
}
fn default_qty_precision() -> u32 {
    5
}
fn default_test_price() -> f64 {
    100_000.0
}
fn default_test_qty() -> f64 {
    0.001
}

/// Bidirectional ticker-id / symbol index, read-only after construction
#[derive(Debug, Clone, Default)]
pub struct TickerRegistry {
    infos: Vec<TickerInfo>,
    by_id: FxHashMap<u32, usize>,
    by_symbol: FxHashMap<String, usize>,
}

impl TickerRegistry {
    /// Build the registry from configured instruments
    #[must_use]
    pub fn new(infos: Vec<TickerInfo>) -> Self {
        let mut by_id = FxHashMap::default();
        let mut by_symbol = FxHashMap::default();
        for (idx, info) in infos.iter().enumerate() {
            by_id.insert(info.ticker_id, idx);
            by_symbol.insert(info.symbol.clone(), idx);
        }
        Self {
            infos,
            by_id,
            by_symbol,
        }
    }

    /// Instrument info by internal id
    #[must_use]
    pub fn info(&self, ticker_id: TickerId) -> Option<&TickerInfo> {
        self.by_id.get(&ticker_id.0).map(|&idx| &self.infos[idx])
    }

    /// Instrument info by exchange symbol
    #[must_use]
    pub fn info_by_symbol(&self, symbol: &str) -> Option<&TickerInfo> {
        self.by_symbol.get(symbol).map(|&idx| &self.infos[idx])
    }

    /// Exchange symbol for an internal id
    #[must_use]
    pub fn symbol(&self, ticker_id: TickerId) -> Option<&str> {
        self.info(ticker_id).map(|info| info.symbol.as_str())
    }

    /// Internal id for an exchange symbol
    #[must_use]
    pub fn ticker_id(&self, symbol: &str) -> Option<TickerId> {
        self.info_by_symbol(symbol)
            .map(|info| TickerId::new(info.ticker_id))
    }

    /// All configured instruments, in configuration order
    pub fn iter(&self) -> impl Iterator<Item = &TickerInfo> {
        self.infos.iter()
    }

    /// Number of configured instruments
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TickerRegistry {
        TickerRegistry::new(vec![
            TickerInfo {
                ticker_id: 1,
                symbol: "BTCUSDT".to_string(),
                base_asset: "BTC".to_string(),
                quote_asset: "USDT".to_string(),
                min_qty: 0.000_01,
                max_qty: 9_000.0,
                step_size: 0.000_01,
                min_notional: 5.0,
                price_precision: 2,
                qty_precision: 5,
                test_price: 100_000.0,
                test_qty: 0.001,
            },
            TickerInfo {
                ticker_id: 2,
                symbol: "ETHUSDT".to_string(),
                base_asset: "ETH".to_string(),
                quote_asset: "USDT".to_string(),
                min_qty: 0.000_1,
                max_qty: 9_000.0,
                step_size: 0.000_1,
                min_notional: 5.0,
                price_precision: 2,
                qty_precision: 4,
                test_price: 4_000.0,
                test_qty: 0.01,
            },
        ])
    }

    #[test]
    fn lookups_are_bidirectional() {
        let registry = sample();
        assert_eq!(registry.symbol(TickerId::new(1)), Some("BTCUSDT"));
        assert_eq!(registry.ticker_id("ETHUSDT"), Some(TickerId::new(2)));
        assert_eq!(
            registry.info_by_symbol("BTCUSDT").map(|i| i.ticker_id),
            Some(1)
        );
    }

    #[test]
    fn unknown_entries_return_none() {
        let registry = sample();
        assert_eq!(registry.symbol(TickerId::new(99)), None);
        assert_eq!(registry.ticker_id("DOGEUSDT"), None);
        assert!(registry.info(TickerId::INVALID).is_none());
    }
}
