//! Exchange client abstraction.
//!
//! The ingestion engine only talks to an exchange through this trait, so
//! the REST client can be swapped for a scripted mock in tests.

use std::collections::HashMap;

use kline_core::{PriceTick, RawCandle, Timeframe};

use crate::error::ExchangeResult;

pub use kline_core::BoxFuture;

/// Result of a batched ticker request.
///
/// Symbols the exchange answered land in `ticks`; symbols it could not
/// answer land in `errors` with a reason.
#[derive(Debug, Clone, Default)]
pub struct TickerBatch {
    pub ticks: HashMap<String, PriceTick>,
    pub errors: HashMap<String, String>,
}

/// Market-data source.
///
/// Symbols are `BASE/QUOTE`; candle and tick timestamps are Unix seconds.
pub trait ExchangeClient: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Fetch up to `limit` candles in ascending time order.
    ///
    /// With `since`, candles start at the first slot at or after `since`;
    /// without it the most recent `limit` candles are returned.
    fn fetch_candles<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
        since: Option<i64>,
        limit: u32,
    ) -> BoxFuture<'a, ExchangeResult<Vec<RawCandle>>>;

    /// Fetch the latest price for one symbol.
    fn fetch_ticker<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ExchangeResult<PriceTick>>;

    /// Fetch latest prices for many symbols in one request.
    fn fetch_tickers<'a>(&'a self, symbols: &'a [String])
        -> BoxFuture<'a, ExchangeResult<TickerBatch>>;

    /// Connectivity check.
    fn ping(&self) -> BoxFuture<'_, ExchangeResult<()>>;
}
