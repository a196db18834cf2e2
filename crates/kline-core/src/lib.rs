//! Core domain types for the kline collector.
//!
//! This crate provides the types shared by every other crate:
//! - `Candle`, `RawCandle`: validated and exchange-shaped OHLCV records
//! - `PriceTick`: live price snapshot for one symbol
//! - `Timeframe`: candle interval with its fixed length in seconds
//! - `GapRange`: inclusive range of missing candle slots
//! - `CandleValidator`: coercion and invariant checks for raw candles
//! - `Clock`: injectable wall clock
//! - `BoxFuture`: return type for the async collaborator traits

pub mod candle;
pub mod clock;
pub mod error;
pub mod future;
pub mod timeframe;
pub mod validation;

pub use candle::{normalize_symbol, Candle, GapRange, PriceTick, RawCandle};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, Result};
pub use future::BoxFuture;
pub use timeframe::Timeframe;
pub use validation::{CandleValidator, ValidationError, ValidationMode};
