//! Candle, price and gap types.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// Validated OHLCV candle.
///
/// `timestamp` is the slot open time in Unix seconds. A candle produced by
/// `CandleValidator` satisfies `high >= max(open, close)` and
/// `low <= min(open, close)` (exactly in strict mode, within 1% in lenient
/// mode).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Whether the OHLC relationship holds exactly.
    pub fn is_consistent(&self) -> bool {
        self.high >= self.open.max(self.close) && self.low <= self.open.min(self.close)
    }
}

/// Candle as delivered by an exchange: a loosely typed tuple.
///
/// Fields are `[timestamp, open, high, low, close, volume, ...]`, each a
/// JSON number or numeric string. Trailing fields beyond the sixth are
/// ignored by the validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawCandle(pub Vec<serde_json::Value>);

impl RawCandle {
    /// Build a raw candle from numeric fields.
    pub fn from_numbers(timestamp: i64, ohlcv: [f64; 5]) -> Self {
        let mut fields = Vec::with_capacity(6);
        fields.push(serde_json::Value::from(timestamp));
        fields.extend(ohlcv.iter().map(|v| serde_json::Value::from(*v)));
        Self(fields)
    }

    pub fn fields(&self) -> &[serde_json::Value] {
        &self.0
    }
}

impl From<Candle> for RawCandle {
    fn from(c: Candle) -> Self {
        Self::from_numbers(c.timestamp, [c.open, c.high, c.low, c.close, c.volume])
    }
}

/// Live price snapshot.
///
/// One logical row per `(symbol, timestamp)`; a later write for the same
/// key replaces the earlier one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: String,
    pub price: f64,
    #[serde(default)]
    pub volume_24h: Option<f64>,
    #[serde(default)]
    pub change_24h: Option<f64>,
    #[serde(default)]
    pub change_pct_24h: Option<f64>,
    /// Unix seconds.
    pub timestamp: i64,
}

/// Inclusive range of missing candle slots.
///
/// Both bounds are slot open timestamps: `{120, 120}` means exactly the
/// slot starting at 120 is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GapRange {
    pub start: i64,
    pub end: i64,
}

impl GapRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Number of slots covered at the given interval.
    pub fn slot_count(&self, interval_secs: i64) -> i64 {
        if interval_secs <= 0 || self.end < self.start {
            return 0;
        }
        (self.end - self.start) / interval_secs + 1
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

impl fmt::Display for GapRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Normalize a trading pair to `BASE/QUOTE` upper case.
///
/// Rejects symbols without exactly one `/` or with an empty side.
pub fn normalize_symbol(symbol: &str) -> Result<String> {
    let symbol = symbol.trim().to_uppercase();
    let mut parts = symbol.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(base), Some(quote), None) if !base.is_empty() && !quote.is_empty() => Ok(symbol),
        _ => Err(CoreError::InvalidSymbol(format!(
            "{symbol}: expected BASE/QUOTE (e.g. BTC/USDT)"
        ))),
    }
}
