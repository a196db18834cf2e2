//! Raw candle validation.
//!
//! Coerces exchange tuples into `Candle` and enforces the OHLC invariant.
//! The mode is a single explicit setting:
//! - `Strict`: any relationship violation, non-positive price or negative
//!   volume rejects the candle
//! - `Lenient`: relationship violations within 1% are accepted as-is and
//!   negative volume is clamped to zero

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::candle::{Candle, PriceTick, RawCandle};

/// Relative tolerance for OHLC relationship checks in lenient mode.
const LENIENT_TOLERANCE: f64 = 0.01;

/// Number of leading fields that make up an OHLCV tuple.
const OHLCV_FIELDS: usize = 6;

/// Validation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    Strict,
    #[default]
    Lenient,
}

/// Candle or tick validation failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    /// Shape or field type is wrong (too few fields, non-numeric, NaN).
    #[error("Malformed candle[{index}]: {reason}")]
    Malformed { index: usize, reason: String },

    /// Fields are numeric but violate a candle invariant.
    #[error("Invalid candle[{index}]: {reason}")]
    InvalidCandle { index: usize, reason: String },

    #[error("Invalid tick for {symbol}: {reason}")]
    InvalidTick { symbol: String, reason: String },
}

impl ValidationError {
    /// Stable label for statistics and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::Malformed { .. } => "malformed_candle",
            ValidationError::InvalidCandle { .. } => "invalid_candle",
            ValidationError::InvalidTick { .. } => "invalid_tick",
        }
    }
}

/// Validates and repairs raw OHLCV records.
#[derive(Debug, Clone, Copy, Default)]
pub struct CandleValidator {
    mode: ValidationMode,
}

impl CandleValidator {
    pub fn new(mode: ValidationMode) -> Self {
        Self { mode }
    }

    pub fn strict() -> Self {
        Self::new(ValidationMode::Strict)
    }

    pub fn lenient() -> Self {
        Self::new(ValidationMode::Lenient)
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// Validate one raw candle.
    ///
    /// `index` is the position of the candle in its batch and only appears
    /// in error messages.
    pub fn validate(&self, raw: &RawCandle, index: usize) -> Result<Candle, ValidationError> {
        let fields = raw.fields();
        if fields.len() < OHLCV_FIELDS {
            return Err(ValidationError::Malformed {
                index,
                reason: format!(
                    "expected [timestamp, open, high, low, close, volume], got {} fields",
                    fields.len()
                ),
            });
        }

        let ts = coerce(&fields[0], "timestamp", index)?;
        let open = coerce(&fields[1], "open", index)?;
        let high = coerce(&fields[2], "high", index)?;
        let low = coerce(&fields[3], "low", index)?;
        let close = coerce(&fields[4], "close", index)?;
        let mut volume = coerce(&fields[5], "volume", index)?;

        if ts < 0.0 || ts.fract() != 0.0 {
            return Err(ValidationError::InvalidCandle {
                index,
                reason: format!("timestamp {ts} is not a non-negative integer"),
            });
        }

        if [open, high, low, close].iter().any(|p| *p <= 0.0) {
            return Err(ValidationError::InvalidCandle {
                index,
                reason: format!(
                    "non-positive price (open={open}, high={high}, low={low}, close={close})"
                ),
            });
        }

        let body_top = open.max(close);
        let body_bottom = open.min(close);
        let (high_floor, low_ceiling) = match self.mode {
            ValidationMode::Strict => (body_top, body_bottom),
            ValidationMode::Lenient => (
                body_top * (1.0 - LENIENT_TOLERANCE),
                body_bottom * (1.0 + LENIENT_TOLERANCE),
            ),
        };

        if high < high_floor {
            return Err(ValidationError::InvalidCandle {
                index,
                reason: format!("high {high} below max(open={open}, close={close})"),
            });
        }
        if low > low_ceiling {
            return Err(ValidationError::InvalidCandle {
                index,
                reason: format!("low {low} above min(open={open}, close={close})"),
            });
        }

        if volume < 0.0 {
            match self.mode {
                ValidationMode::Strict => {
                    return Err(ValidationError::InvalidCandle {
                        index,
                        reason: format!("negative volume {volume}"),
                    });
                }
                ValidationMode::Lenient => volume = 0.0,
            }
        }

        Ok(Candle::new(ts as i64, open, high, low, close, volume))
    }

    /// Validate a live price snapshot.
    pub fn validate_tick(&self, tick: &PriceTick) -> Result<(), ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidTick {
            symbol: tick.symbol.clone(),
            reason,
        };

        if !tick.price.is_finite() || tick.price <= 0.0 {
            return Err(invalid(format!("price {} is not positive", tick.price)));
        }
        if let Some(volume) = tick.volume_24h {
            if !volume.is_finite() || volume < 0.0 {
                return Err(invalid(format!("24h volume {volume} is negative")));
            }
        }
        if tick.timestamp < 0 {
            return Err(invalid(format!("timestamp {} is negative", tick.timestamp)));
        }
        Ok(())
    }
}

fn coerce(value: &serde_json::Value, field: &str, index: usize) -> Result<f64, ValidationError> {
    let malformed = |reason: String| ValidationError::Malformed {
        index,
        reason: format!("{field}: {reason}"),
    };

    let number = match value {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| malformed(format!("{n} is not representable")))?,
        serde_json::Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Err(malformed("empty string".to_string()));
            }
            s.parse::<f64>()
                .map_err(|_| malformed(format!("'{s}' is not numeric")))?
        }
        serde_json::Value::Null => return Err(malformed("missing".to_string())),
        other => return Err(malformed(format!("unexpected value {other}"))),
    };

    if !number.is_finite() {
        return Err(malformed(format!("{number} is not finite")));
    }
    Ok(number)
}
