//! Storage abstraction consumed by the ingestion engine.

use kline_core::{BoxFuture, Candle, PriceTick, Timeframe};
use serde::Serialize;

use crate::error::StoreResult;

/// Rows removed by a retention cleanup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub candles_deleted: usize,
    pub prices_deleted: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.candles_deleted + self.prices_deleted
    }
}

/// Row counts per table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub candle_rows: usize,
    pub price_rows: usize,
    pub series: usize,
    pub oldest_candle: Option<i64>,
    pub newest_candle: Option<i64>,
}

/// Durable candle and price storage.
///
/// Candles are keyed by `(symbol, timeframe, timestamp)` and the first
/// write wins: re-inserting an existing key is a no-op. Prices are keyed
/// by `(symbol, timestamp)` and a later write replaces the earlier one.
pub trait CandleStore: Send + Sync {
    /// Newest stored candle timestamp for a series.
    fn latest_timestamp<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
    ) -> BoxFuture<'a, StoreResult<Option<i64>>>;

    /// Insert candles, ignoring keys that already exist. Returns the
    /// number of rows actually inserted.
    fn upsert_candles<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
        candles: &'a [Candle],
    ) -> BoxFuture<'a, StoreResult<usize>>;

    /// Insert or replace a price row. Returns `true` when the key was new.
    fn upsert_price<'a>(&'a self, tick: &'a PriceTick) -> BoxFuture<'a, StoreResult<bool>>;

    /// Sorted candle timestamps in `[start, end]`.
    fn timestamps_in_range<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> BoxFuture<'a, StoreResult<Vec<i64>>>;

    /// Sorted candles in `[start, end]`.
    fn candles_in_range<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> BoxFuture<'a, StoreResult<Vec<Candle>>>;

    /// Newest stored price for a symbol.
    fn latest_price<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, StoreResult<Option<PriceTick>>>;

    /// Delete candles and prices with a timestamp before `cutoff`.
    fn delete_older_than(&self, cutoff: i64) -> BoxFuture<'_, StoreResult<CleanupReport>>;

    fn stats(&self) -> BoxFuture<'_, StoreResult<StoreStats>>;
}
