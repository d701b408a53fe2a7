//! Core scalar types shared across the connectivity core
//!
//! Prices and quantities are fixed-point `i64` values scaled by [`SCALE`]
//! for determinism; conversion to and from the exchange's decimal-string
//! representation is localized here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// System-wide fixed-point scale factor (4 decimal places)
pub const SCALE: i64 = 10_000;

/// Internal instrument identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TickerId(pub u32);

impl TickerId {
    /// Sentinel for an unknown or unmapped instrument
    pub const INVALID: Self = Self(u32::MAX);

    /// Create a new ticker id
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Whether this id refers to a real instrument
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.0 != u32::MAX
    }
}

impl fmt::Display for TickerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TKR_{}", self.0)
    }
}

/// Internal order identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl OrderId {
    /// Sentinel for a missing order id
    pub const INVALID: Self = Self(u64::MAX);

    /// Create a new order id
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Whether this id refers to a real order
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.0 != u64::MAX
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ORD_{}", self.0)
    }
}

/// Engine client identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u32);

impl ClientId {
    /// Create a new client id
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CLI_{}", self.0)
    }
}

/// Price in fixed-point ticks (1 tick = 1 / [`SCALE`])
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Px(i64);

impl Px {
    /// Sentinel for an unavailable price
    pub const INVALID: Self = Self(i64::MIN);

    /// Zero price
    pub const ZERO: Self = Self(0);

    /// Create a price from a decimal value (rounds to the nearest tick)
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(value: f64) -> Self {
        Self((value * SCALE as f64).round() as i64)
    }

    /// Create a price from raw ticks
    #[must_use]
    pub const fn from_ticks(ticks: i64) -> Self {
        Self(ticks)
    }

    /// Raw tick count
    #[must_use]
    pub const fn as_ticks(&self) -> i64 {
        self.0
    }

    /// Decimal value
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / SCALE as f64
    }

    /// Whether this price carries a real value
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.0 != i64::MIN
    }

    /// Parse an exchange decimal string; returns [`Px::INVALID`] on failure
    #[must_use]
    pub fn from_decimal_str(s: &str) -> Self {
        s.trim().parse::<f64>().map_or(Self::INVALID, Self::new)
    }

    /// Render as a decimal string with at most `decimals` fractional digits,
    /// trailing zeros trimmed to the minimum significant precision
    #[must_use]
    pub fn to_decimal_string(&self, decimals: usize) -> String {
        format_ticks(self.0, decimals)
    }
}

impl fmt::Display for Px {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{:.4}", self.as_f64())
        } else {
            write!(f, "INVALID")
        }
    }
}

/// Quantity in fixed-point units (1 unit = 1 / [`SCALE`])
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Qty(i64);

impl Qty {
    /// Sentinel for an unavailable quantity
    pub const INVALID: Self = Self(i64::MIN);

    /// Zero quantity
    pub const ZERO: Self = Self(0);

    /// Create a quantity from a decimal value (rounds to the nearest unit)
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(value: f64) -> Self {
        Self((value * SCALE as f64).round() as i64)
    }

    /// Create a quantity from raw units
    #[must_use]
    pub const fn from_units(units: i64) -> Self {
        Self(units)
    }

    /// Raw unit count
    #[must_use]
    pub const fn as_units(&self) -> i64 {
        self.0
    }

    /// Decimal value
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / SCALE as f64
    }

    /// Whether this quantity carries a real value
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.0 != i64::MIN
    }

    /// Whether this quantity is exactly zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parse an exchange decimal string; returns [`Qty::INVALID`] on failure
    #[must_use]
    pub fn from_decimal_str(s: &str) -> Self {
        s.trim().parse::<f64>().map_or(Self::INVALID, Self::new)
    }

    /// Render as a decimal string with at most `decimals` fractional digits
    #[must_use]
    pub fn to_decimal_string(&self, decimals: usize) -> String {
        format_ticks(self.0, decimals)
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{:.4}", self.as_f64())
        } else {
            write!(f, "INVALID")
        }
    }
}

/// Timestamp in nanoseconds since the UNIX epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ts(pub u64);

impl Ts {
    /// Current wall-clock timestamp
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| std::time::Duration::from_secs(0))
            .as_nanos() as u64;
        Self(nanos)
    }

    /// Create a timestamp from nanoseconds
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Nanoseconds since the epoch
    #[must_use]
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Milliseconds since the epoch
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0 / 1_000_000
    }
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// Trading side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Buy side (bid)
    Buy,
    /// Sell side (ask)
    Sell,
}

impl Side {
    /// Exchange wire representation
    #[must_use]
    pub const fn as_exchange_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }

    /// Parse the exchange wire representation
    #[must_use]
    pub fn from_exchange_str(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_exchange_str())
    }
}

/// Integer fixed-point formatter shared by [`Px`] and [`Qty`]
fn format_ticks(ticks: i64, decimals: usize) -> String {
    if ticks == i64::MIN {
        return "INVALID".to_string();
    }
    let sign = if ticks < 0 { "-" } else { "" };
    let abs = ticks.unsigned_abs();
    let scale = SCALE.unsigned_abs();
    let whole = abs / scale;
    let frac = abs % scale;
    let mut out = format!("{sign}{whole}");
    if decimals > 0 {
        let mut frac_str = format!("{frac:04}");
        if decimals < 4 {
            frac_str.truncate(decimals);
        } else {
            frac_str.push_str(&"0".repeat(decimals - 4));
        }
        out.push('.');
        out.push_str(&frac_str);
    }
    if out.contains('.') {
        while out.ends_with('0') {
            out.pop();
        }
        if out.ends_with('.') {
            out.pop();
        }
    }
    if out.is_empty() || out == "-" {
        out = "0".to_string();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn px_round_trips_within_scale_precision() {
        for s in ["30000", "0.1", "45123.45", "0.001", "12.3456"] {
            let px = Px::from_decimal_str(s);
            assert!(px.is_valid());
            let back = Px::from_decimal_str(&px.to_decimal_string(4));
            assert_eq!(px, back, "round trip failed for {s}");
        }
    }

    #[test]
    fn px_decimal_string_trims_trailing_zeros() {
        assert_eq!(Px::new(10.0).to_decimal_string(4), "10");
        assert_eq!(Px::new(10.5).to_decimal_string(4), "10.5");
        assert_eq!(Px::new(0.001).to_decimal_string(8), "0.001");
        assert_eq!(Px::new(30000.0).to_decimal_string(2), "30000");
    }

    #[test]
    fn qty_decimal_string_truncates_to_requested_precision() {
        assert_eq!(Qty::new(0.0015).to_decimal_string(3), "0.001");
        assert_eq!(Qty::new(1.0).to_decimal_string(0), "1");
    }

    #[test]
    fn invalid_sentinels_are_distinct_from_values() {
        assert!(!Px::INVALID.is_valid());
        assert!(!Qty::INVALID.is_valid());
        assert!(!TickerId::INVALID.is_valid());
        assert!(!OrderId::INVALID.is_valid());
        assert!(Px::ZERO.is_valid());
        assert!(Qty::ZERO.is_valid());
    }

    #[test]
    fn unparseable_decimal_is_invalid() {
        assert_eq!(Px::from_decimal_str("not-a-price"), Px::INVALID);
        assert_eq!(Qty::from_decimal_str(""), Qty::INVALID);
    }

    #[test]
    fn side_exchange_strings() {
        assert_eq!(Side::Buy.as_exchange_str(), "BUY");
        assert_eq!(Side::from_exchange_str("SELL"), Some(Side::Sell));
        assert_eq!(Side::from_exchange_str("HOLD"), None);
    }
}
