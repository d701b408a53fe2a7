//! Feed message handling tests (no external API calls)

use common::{Px, Qty, Side, TickerId, UpdateKind};
use feeds::{parse_levels, DepthEvent, DepthSnapshot, TradeEvent};
use lob::{DeltaOutcome, OrderBook};

const SNAPSHOT: &str = r#"{
    "lastUpdateId": 1027024,
    "bids": [["30000.00000000", "1.00000000"], ["29999.50000000", "2.50000000"]],
    "asks": [["30000.50000000", "0.75000000"], ["30001.00000000", "3.00000000"]]
}"#;

const DELTA: &str = r#"{
    "e": "depthUpdate", "E": 1672515782136, "s": "BTCUSDT",
    "U": 1027025, "u": 1027030,
    "b": [["30000.00000000", "0.00000000"], ["29999.00000000", "4.00000000"]],
    "a": [["30000.50000000", "1.25000000"]]
}"#;

#[test]
fn snapshot_and_delta_wire_formats_drive_the_book() {
    let snapshot: DepthSnapshot = serde_json::from_str(SNAPSHOT).expect("snapshot");
    let mut book = OrderBook::new("BTCUSDT", TickerId::new(1));
    assert!(book.apply_snapshot(
        snapshot.last_update_id,
        &parse_levels(&snapshot.bids),
        &parse_levels(&snapshot.asks),
    ));
    assert_eq!(book.best_bid(), Px::new(30_000.0));
    assert_eq!(book.best_ask(), Px::new(30_000.5));

    let delta: DepthEvent = serde_json::from_str(DELTA).expect("delta");
    let outcome = book.apply_delta(
        delta.first_update_id,
        delta.final_update_id,
        &parse_levels(&delta.bids),
        &parse_levels(&delta.asks),
    );
    assert_eq!(outcome, DeltaOutcome::Applied);
    assert_eq!(book.last_update_id(), 1_027_030);

    // 30000.0 bid deleted, 29999.0 added, ask size replaced
    assert_eq!(book.best_bid(), Px::new(29_999.5));
    assert_eq!(book.qty_at(Px::new(29_999.0), Side::Buy), Qty::new(4.0));
    assert_eq!(book.qty_at(Px::new(30_000.5), Side::Sell), Qty::new(1.25));
}

#[test]
fn generated_stream_is_a_consistent_reset() {
    let snapshot: DepthSnapshot = serde_json::from_str(SNAPSHOT).expect("snapshot");
    let mut book = OrderBook::new("BTCUSDT", TickerId::new(1));
    book.apply_snapshot(
        snapshot.last_update_id,
        &parse_levels(&snapshot.bids),
        &parse_levels(&snapshot.asks),
    );

    let mut updates = Vec::new();
    book.generate_updates(&mut updates);
    assert_eq!(updates[0].kind, UpdateKind::Clear);
    assert_eq!(updates.len(), 5);
    // bids first in descending order, then asks ascending
    assert_eq!(updates[1].price, Px::new(30_000.0));
    assert_eq!(updates[2].price, Px::new(29_999.5));
    assert_eq!(updates[3].price, Px::new(30_000.5));
    assert_eq!(updates[4].price, Px::new(30_001.0));
}

#[test]
fn trade_event_sides_follow_the_maker_flag() {
    let sell: TradeEvent = serde_json::from_str(
        r#"{"e":"trade","E":1,"s":"BTCUSDT","p":"30000.1","q":"0.2","m":true}"#,
    )
    .expect("trade");
    assert!(sell.is_buyer_maker);
    let side = if sell.is_buyer_maker {
        Side::Sell
    } else {
        Side::Buy
    };
    assert_eq!(side, Side::Sell);
    assert_eq!(Px::from_decimal_str(&sell.price), Px::new(30_000.1));
    assert_eq!(Qty::from_decimal_str(&sell.quantity), Qty::new(0.2));
}
