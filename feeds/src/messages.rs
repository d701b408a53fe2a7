//! Exchange wire-format types for the public market-data streams

use common::{Px, Qty};
use serde::Deserialize;

/// Incremental depth update from the `<symbol>@depth` stream
#[derive(Debug, Deserialize)]
pub struct DepthEvent {
    /// Event type tag, `depthUpdate`
    #[serde(rename = "e", default)]
    pub event_type: String,
    /// Exchange event time in milliseconds
    #[serde(rename = "E", default)]
    pub event_time: u64,
    /// Exchange symbol
    #[serde(rename = "s", default)]
    pub symbol: String,
    /// First update id covered by this delta
    #[serde(rename = "U")]
    pub first_update_id: u64,
    /// Final update id covered by this delta
    #[serde(rename = "u")]
    pub final_update_id: u64,
    /// Bid rows as `[price, qty]` decimal strings
    #[serde(rename = "b", default)]
    pub bids: Vec<[String; 2]>,
    /// Ask rows as `[price, qty]` decimal strings
    #[serde(rename = "a", default)]
    pub asks: Vec<[String; 2]>,
}

/// Full book image from `GET /api/v3/depth`
#[derive(Debug, Deserialize)]
pub struct DepthSnapshot {
    /// Highest update id reflected in the snapshot
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    /// Bid rows as `[price, qty]` decimal strings
    pub bids: Vec<[String; 2]>,
    /// Ask rows as `[price, qty]` decimal strings
    pub asks: Vec<[String; 2]>,
}

/// Trade print from the `<symbol>@trade` stream
#[derive(Debug, Deserialize)]
pub struct TradeEvent {
    /// Event type tag, `trade`
    #[serde(rename = "e", default)]
    pub event_type: String,
    /// Exchange event time in milliseconds
    #[serde(rename = "E", default)]
    pub event_time: u64,
    /// Exchange symbol
    #[serde(rename = "s", default)]
    pub symbol: String,
    /// Trade price as a decimal string
    #[serde(rename = "p")]
    pub price: String,
    /// Trade quantity as a decimal string
    #[serde(rename = "q")]
    pub quantity: String,
    /// Whether the buyer was the resting maker
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

/// Convert `[price, qty]` decimal-string rows to internal scale, dropping
/// rows with an unparseable price or quantity
pub fn parse_levels(rows: &[[String; 2]]) -> Vec<(Px, Qty)> {
    rows.iter()
        .filter_map(|[price, qty]| {
            let price = Px::from_decimal_str(price);
            let qty = Qty::from_decimal_str(qty);
            (price.is_valid() && qty.is_valid()).then_some((price, qty))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_depth_event() {
        let raw = r#"{
            "e": "depthUpdate", "E": 1672515782136, "s": "BTCUSDT",
            "U": 157, "u": 160,
            "b": [["0.0024", "10"]],
            "a": [["0.0026", "100"], ["0.0027", "0"]]
        }"#;
        let event: DepthEvent = serde_json::from_str(raw).expect("parse");
        assert_eq!(event.event_type, "depthUpdate");
        assert_eq!(event.first_update_id, 157);
        assert_eq!(event.final_update_id, 160);
        assert_eq!(event.bids.len(), 1);
        assert_eq!(event.asks.len(), 2);
    }

    #[test]
    fn parses_depth_snapshot() {
        let raw = r#"{
            "lastUpdateId": 1027024,
            "bids": [["4.00000000", "431.00000000"]],
            "asks": [["4.00000200", "12.00000000"]]
        }"#;
        let snapshot: DepthSnapshot = serde_json::from_str(raw).expect("parse");
        assert_eq!(snapshot.last_update_id, 1_027_024);
        let bids = parse_levels(&snapshot.bids);
        assert_eq!(bids, vec![(Px::new(4.0), Qty::new(431.0))]);
    }

    #[test]
    fn parses_trade_event() {
        let raw = r#"{
            "e": "trade", "E": 1672515782136, "s": "BNBBTC",
            "t": 12345, "p": "0.001", "q": "100", "T": 1672515782136, "m": true, "M": true
        }"#;
        let event: TradeEvent = serde_json::from_str(raw).expect("parse");
        assert!(event.is_buyer_maker);
        assert_eq!(Px::from_decimal_str(&event.price), Px::new(0.001));
    }

    #[test]
    fn unparseable_rows_are_dropped() {
        let rows = vec![
            ["10.0".to_string(), "1.0".to_string()],
            ["bogus".to_string(), "1.0".to_string()],
            ["10.5".to_string(), "nope".to_string()],
        ];
        let levels = parse_levels(&rows);
        assert_eq!(levels, vec![(Px::new(10.0), Qty::new(1.0))]);
    }
}
