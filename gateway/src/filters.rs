//! Exchange-rule parsing and enforcement
//!
//! The exchange publishes per-symbol trading rules as a `filters` array in
//! `/api/v3/exchangeInfo`. Filter values arrive as either JSON strings or
//! numbers depending on API vintage, so every read goes through a tolerant
//! accessor.

use common::Side;
use serde_json::Value;

/// Default percent-price band when the symbol carries no such filter
pub const DEFAULT_PERCENT_BAND: f64 = 0.05;

/// Fraction of the free balance left aside for fees when sizing orders
pub const FEE_HEADROOM: f64 = 0.95;

/// Allowed relative deviation of an order price from the market price
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentPriceBounds {
    /// Maximum fraction above the market price
    pub up_mult: f64,
    /// Maximum fraction below the market price
    pub down_mult: f64,
}

impl Default for PercentPriceBounds {
    fn default() -> Self {
        Self {
            up_mult: DEFAULT_PERCENT_BAND,
            down_mult: DEFAULT_PERCENT_BAND,
        }
    }
}

/// `LOT_SIZE` quantity bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LotSize {
    /// Minimum order quantity
    pub min_qty: f64,
    /// Maximum order quantity; 0 means unbounded
    pub max_qty: f64,
    /// Quantity increment
    pub step_size: f64,
}

/// Read a filter value that may be a JSON number or a decimal string
pub fn num_or_str(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn filters(info: &Value) -> impl Iterator<Item = &Value> {
    info.get("filters")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn find_filter<'a>(info: &'a Value, filter_type: &str) -> Option<&'a Value> {
    filters(info).find(|f| f.get("filterType").and_then(Value::as_str) == Some(filter_type))
}

/// Percent-price band for a side, from `PERCENT_PRICE` or the per-side
/// `PERCENT_PRICE_BY_SIDE` variant; defaults to +-5% when absent
pub fn percent_price_bounds(info: &Value, side: Side) -> PercentPriceBounds {
    let mut bounds = PercentPriceBounds::default();
    if let Some(filter) = find_filter(info, "PERCENT_PRICE") {
        if let Some(up) = filter.get("multiplierUp").and_then(num_or_str) {
            bounds.up_mult = up - 1.0;
        }
        if let Some(down) = filter.get("multiplierDown").and_then(num_or_str) {
            bounds.down_mult = 1.0 - down;
        }
        return bounds;
    }
    if let Some(filter) = find_filter(info, "PERCENT_PRICE_BY_SIDE") {
        let (up_key, down_key) = match side {
            Side::Buy => ("bidMultiplierUp", "bidMultiplierDown"),
            Side::Sell => ("askMultiplierUp", "askMultiplierDown"),
        };
        if let Some(up) = filter.get(up_key).and_then(num_or_str) {
            bounds.up_mult = up - 1.0;
        }
        if let Some(down) = filter.get(down_key).and_then(num_or_str) {
            bounds.down_mult = 1.0 - down;
        }
    }
    bounds
}

/// `PRICE_FILTER` min/max bounds, when present and positive
pub fn price_bounds(info: &Value) -> (Option<f64>, Option<f64>) {
    let Some(filter) = find_filter(info, "PRICE_FILTER") else {
        return (None, None);
    };
    let min = filter
        .get("minPrice")
        .and_then(num_or_str)
        .filter(|&v| v > 0.0);
    let max = filter
        .get("maxPrice")
        .and_then(num_or_str)
        .filter(|&v| v > 0.0);
    (min, max)
}

/// Decimal places implied by the `PRICE_FILTER` tick size
pub fn tick_decimals(info: &Value) -> Option<usize> {
    find_filter(info, "PRICE_FILTER")
        .and_then(|f| f.get("tickSize"))
        .and_then(decimal_places)
}

/// `LOT_SIZE` bounds, when present
pub fn lot_size(info: &Value) -> Option<LotSize> {
    let filter = find_filter(info, "LOT_SIZE")?;
    Some(LotSize {
        min_qty: filter.get("minQty").and_then(num_or_str).unwrap_or(0.0),
        max_qty: filter.get("maxQty").and_then(num_or_str).unwrap_or(0.0),
        step_size: filter.get("stepSize").and_then(num_or_str).unwrap_or(0.0),
    })
}

/// Decimal places implied by the `LOT_SIZE` step size
pub fn step_decimals(info: &Value) -> Option<usize> {
    find_filter(info, "LOT_SIZE")
        .and_then(|f| f.get("stepSize"))
        .and_then(decimal_places)
}

/// Minimum order notional from the `NOTIONAL` (or legacy `MIN_NOTIONAL`)
/// filter
pub fn min_notional(info: &Value) -> Option<f64> {
    let filter =
        find_filter(info, "NOTIONAL").or_else(|| find_filter(info, "MIN_NOTIONAL"))?;
    filter
        .get("minNotional")
        .and_then(num_or_str)
        .filter(|&v| v > 0.0)
}

/// Significant decimal places of a tick/step value such as `"0.00100000"`
pub fn decimal_places(value: &Value) -> Option<usize> {
    let rendered = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => format!("{}", n.as_f64()?),
        _ => return None,
    };
    let rendered = rendered.trim();
    match rendered.find('.') {
        None => Some(0),
        Some(pos) => Some(rendered[pos + 1..].trim_end_matches('0').len()),
    }
}

/// Format a decimal value with at most `decimals` fractional digits,
/// trailing zeros trimmed to the minimum significant precision
pub fn format_decimal(value: f64, decimals: usize) -> String {
    let mut out = format!("{value:.decimals$}");
    if out.contains('.') {
        while out.ends_with('0') {
            out.pop();
        }
        if out.ends_with('.') {
            out.pop();
        }
    }
    out
}

/// Whether an order price sits inside the percent-price band around the
/// market price. Fails closed when no market price is available.
pub fn price_within_band(
    order_price: f64,
    market_price: f64,
    bounds: PercentPriceBounds,
) -> bool {
    if market_price <= 0.0 {
        return false;
    }
    let diff = (order_price - market_price) / market_price;
    diff <= bounds.up_mult && diff >= -bounds.down_mult
}

/// Size an order from the free balance of the funding asset: apply the fee
/// headroom, clamp into the lot bounds, round down to the step, then round
/// up if the notional falls short of the minimum
pub fn size_order(
    free_balance: f64,
    price: f64,
    side: Side,
    lot: LotSize,
    min_notional: Option<f64>,
) -> f64 {
    let usable = free_balance * FEE_HEADROOM;
    let mut qty = match side {
        Side::Buy => {
            if price > 0.0 {
                usable / price
            } else {
                0.0
            }
        }
        Side::Sell => usable,
    };
    if qty < lot.min_qty {
        qty = lot.min_qty;
    }
    if lot.max_qty > 0.0 && qty > lot.max_qty {
        qty = lot.max_qty;
    }
    if lot.step_size > 0.0 {
        qty = (qty / lot.step_size).floor() * lot.step_size;
    }
    if let Some(min_notional) = min_notional {
        if price > 0.0 && qty * price < min_notional {
            qty = (min_notional / price * 100.0).ceil() / 100.0;
        }
    }
    qty
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn info_with_filters(filters: Value) -> Value {
        json!({ "symbol": "BTCUSDT", "filters": filters })
    }

    #[test]
    fn percent_price_accepts_numbers_and_strings() {
        let info = info_with_filters(json!([
            { "filterType": "PERCENT_PRICE", "multiplierUp": 1.1, "multiplierDown": "0.9" }
        ]));
        let bounds = percent_price_bounds(&info, Side::Buy);
        assert!((bounds.up_mult - 0.1).abs() < 1e-9);
        assert!((bounds.down_mult - 0.1).abs() < 1e-9);
    }

    #[rstest]
    #[case(Side::Buy, 0.2, 0.15)]
    #[case(Side::Sell, 0.3, 0.25)]
    fn percent_price_by_side_selects_side_keys(
        #[case] side: Side,
        #[case] up: f64,
        #[case] down: f64,
    ) {
        let info = info_with_filters(json!([
            {
                "filterType": "PERCENT_PRICE_BY_SIDE",
                "bidMultiplierUp": "1.2", "bidMultiplierDown": "0.85",
                "askMultiplierUp": "1.3", "askMultiplierDown": "0.75"
            }
        ]));
        let bounds = percent_price_bounds(&info, side);
        assert!((bounds.up_mult - up).abs() < 1e-9);
        assert!((bounds.down_mult - down).abs() < 1e-9);
    }

    #[test]
    fn missing_filter_defaults_to_five_percent() {
        let info = info_with_filters(json!([]));
        let bounds = percent_price_bounds(&info, Side::Sell);
        assert_eq!(bounds, PercentPriceBounds::default());
    }

    #[test]
    fn band_check_fails_closed_without_market_price() {
        assert!(!price_within_band(100.0, 0.0, PercentPriceBounds::default()));
        assert!(!price_within_band(100.0, -1.0, PercentPriceBounds::default()));
    }

    #[rstest]
    #[case(104.9, true)]
    #[case(105.1, false)]
    #[case(95.1, true)]
    #[case(94.9, false)]
    fn band_check_brackets_the_market_price(#[case] order: f64, #[case] ok: bool) {
        assert_eq!(
            price_within_band(order, 100.0, PercentPriceBounds::default()),
            ok
        );
    }

    #[test]
    fn decimal_places_trims_trailing_zeros() {
        assert_eq!(decimal_places(&json!("0.00100000")), Some(3));
        assert_eq!(decimal_places(&json!("0.01000000")), Some(2));
        assert_eq!(decimal_places(&json!("1.00000000")), Some(0));
        assert_eq!(decimal_places(&json!(0.001)), Some(3));
        assert_eq!(decimal_places(&json!(1)), Some(0));
    }

    #[test]
    fn format_decimal_trims_to_significant_precision() {
        assert_eq!(format_decimal(30000.0, 2), "30000");
        assert_eq!(format_decimal(0.0015, 5), "0.0015");
        assert_eq!(format_decimal(1.2300, 4), "1.23");
        assert_eq!(format_decimal(0.1, 1), "0.1");
    }

    #[test]
    fn lot_size_and_notional_parse_both_representations() {
        let info = info_with_filters(json!([
            { "filterType": "LOT_SIZE", "minQty": "0.00001", "maxQty": 9000.0, "stepSize": "0.00001" },
            { "filterType": "NOTIONAL", "minNotional": "5.00" }
        ]));
        let lot = lot_size(&info).expect("lot size");
        assert!((lot.min_qty - 0.000_01).abs() < 1e-12);
        assert!((lot.max_qty - 9000.0).abs() < 1e-9);
        assert_eq!(min_notional(&info), Some(5.0));
    }

    #[test]
    fn legacy_min_notional_filter_is_recognized() {
        let info = info_with_filters(json!([
            { "filterType": "MIN_NOTIONAL", "minNotional": 10.0 }
        ]));
        assert_eq!(min_notional(&info), Some(10.0));
    }

    #[test]
    fn price_bounds_ignore_zero_sentinels() {
        let info = info_with_filters(json!([
            { "filterType": "PRICE_FILTER", "minPrice": "0.00000000", "maxPrice": "1000000.00", "tickSize": "0.01" }
        ]));
        let (min, max) = price_bounds(&info);
        assert_eq!(min, None);
        assert_eq!(max, Some(1_000_000.0));
        assert_eq!(tick_decimals(&info), Some(2));
    }

    #[test]
    fn buy_sizing_divides_usable_balance_by_price() {
        let lot = LotSize {
            min_qty: 0.0001,
            max_qty: 100.0,
            step_size: 0.0001,
        };
        // 1000 * 0.95 / 20000 = 0.0475
        let qty = size_order(1000.0, 20_000.0, Side::Buy, lot, Some(5.0));
        assert!((qty - 0.0475).abs() < 1e-9);
    }

    #[test]
    fn sell_sizing_uses_base_balance_directly() {
        let lot = LotSize {
            min_qty: 0.001,
            max_qty: 0.0,
            step_size: 0.001,
        };
        // 0.5 * 0.95 = 0.475, floored to step
        let qty = size_order(0.5, 20_000.0, Side::Sell, lot, None);
        assert!((qty - 0.475).abs() < 1e-9);
    }

    #[test]
    fn sizing_rounds_up_to_meet_min_notional() {
        let lot = LotSize {
            min_qty: 0.0001,
            max_qty: 100.0,
            step_size: 0.0001,
        };
        // usable 0.95 at price 100 -> 0.0095, notional 0.95 < 5 -> bumped
        let qty = size_order(1.0, 100.0, Side::Buy, lot, Some(5.0));
        assert!(qty * 100.0 >= 5.0);
    }

    #[test]
    fn sizing_clamps_into_lot_bounds() {
        let lot = LotSize {
            min_qty: 0.01,
            max_qty: 0.05,
            step_size: 0.01,
        };
        let qty = size_order(1_000_000.0, 10.0, Side::Buy, lot, None);
        assert!((qty - 0.05).abs() < 1e-12);

        let tiny = size_order(0.0, 10.0, Side::Buy, lot, None);
        assert!((tiny - 0.01).abs() < 1e-12);
    }
}
