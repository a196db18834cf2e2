//! Scripted in-memory exchange.
//!
//! Serves candles and prices from memory and lets tests inject failures
//! per symbol. Every request is recorded for verification.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use kline_core::{Candle, PriceTick, RawCandle, Timeframe};
use parking_lot::Mutex;

use crate::client::{BoxFuture, ExchangeClient, TickerBatch};
use crate::error::{ExchangeError, ExchangeResult};

/// One recorded `fetch_candles` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandleRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub since: Option<i64>,
    pub limit: u32,
}

/// In-memory exchange for tests.
#[derive(Debug, Default)]
pub struct MockExchange {
    series: Mutex<HashMap<(String, Timeframe), BTreeMap<i64, Candle>>>,
    prices: Mutex<HashMap<String, PriceTick>>,
    invalid_symbols: Mutex<HashSet<String>>,
    /// Errors returned (front first) before normal service resumes.
    scripted_failures: Mutex<HashMap<String, VecDeque<ExchangeError>>>,
    batch_failure: Mutex<Option<ExchangeError>>,
    candle_requests: Mutex<Vec<CandleRequest>>,
    ticker_calls: AtomicU64,
    batch_calls: AtomicU64,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add candles to a series. Existing slots are overwritten.
    pub fn push_candles(&self, symbol: &str, timeframe: Timeframe, candles: &[Candle]) {
        let mut series = self.series.lock();
        let entry = series.entry((symbol.to_string(), timeframe)).or_default();
        for c in candles {
            entry.insert(c.timestamp, *c);
        }
    }

    pub fn set_price(&self, tick: PriceTick) {
        self.prices.lock().insert(tick.symbol.clone(), tick);
    }

    pub fn mark_invalid(&self, symbol: &str) {
        self.invalid_symbols.lock().insert(symbol.to_string());
    }

    /// Fail the next `times` requests touching `symbol` with `error`.
    pub fn fail_next(&self, symbol: &str, error: ExchangeError, times: usize) {
        let mut failures = self.scripted_failures.lock();
        let queue = failures.entry(symbol.to_string()).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Make every batched ticker request fail as a whole.
    pub fn fail_batches(&self, error: Option<ExchangeError>) {
        *self.batch_failure.lock() = error;
    }

    pub fn candle_requests(&self) -> Vec<CandleRequest> {
        self.candle_requests.lock().clone()
    }

    pub fn ticker_calls(&self) -> u64 {
        self.ticker_calls.load(Ordering::Relaxed)
    }

    pub fn batch_calls(&self) -> u64 {
        self.batch_calls.load(Ordering::Relaxed)
    }

    fn check_symbol(&self, symbol: &str) -> ExchangeResult<()> {
        if self.invalid_symbols.lock().contains(symbol) {
            return Err(ExchangeError::InvalidSymbol(symbol.to_string()));
        }
        let mut failures = self.scripted_failures.lock();
        if let Some(err) = failures.get_mut(symbol).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(())
    }

    fn ticker(&self, symbol: &str) -> ExchangeResult<PriceTick> {
        self.check_symbol(symbol)?;
        self.prices
            .lock()
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::BadResponse(format!("no price for {symbol}")))
    }
}

impl ExchangeClient for MockExchange {
    fn name(&self) -> &str {
        "mock"
    }

    fn fetch_candles<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
        since: Option<i64>,
        limit: u32,
    ) -> BoxFuture<'a, ExchangeResult<Vec<RawCandle>>> {
        Box::pin(async move {
            self.candle_requests.lock().push(CandleRequest {
                symbol: symbol.to_string(),
                timeframe,
                since,
                limit,
            });
            self.check_symbol(symbol)?;

            let series = self.series.lock();
            let Some(candles) = series.get(&(symbol.to_string(), timeframe)) else {
                return Ok(Vec::new());
            };

            let limit = limit as usize;
            let selected: Vec<RawCandle> = match since {
                Some(since) => candles
                    .range(since..)
                    .take(limit)
                    .map(|(_, c)| RawCandle::from(*c))
                    .collect(),
                None => {
                    let skip = candles.len().saturating_sub(limit);
                    candles
                        .values()
                        .skip(skip)
                        .map(|c| RawCandle::from(*c))
                        .collect()
                }
            };
            Ok(selected)
        })
    }

    fn fetch_ticker<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ExchangeResult<PriceTick>> {
        Box::pin(async move {
            self.ticker_calls.fetch_add(1, Ordering::Relaxed);
            self.ticker(symbol)
        })
    }

    fn fetch_tickers<'a>(
        &'a self,
        symbols: &'a [String],
    ) -> BoxFuture<'a, ExchangeResult<TickerBatch>> {
        Box::pin(async move {
            self.batch_calls.fetch_add(1, Ordering::Relaxed);
            if let Some(err) = self.batch_failure.lock().clone() {
                return Err(err);
            }

            let mut batch = TickerBatch::default();
            for symbol in symbols {
                match self.ticker(symbol) {
                    Ok(tick) => {
                        batch.ticks.insert(symbol.clone(), tick);
                    }
                    Err(e) => {
                        batch.errors.insert(symbol.clone(), e.to_string());
                    }
                }
            }
            Ok(batch)
        })
    }

    fn ping(&self) -> BoxFuture<'_, ExchangeResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(n: i64) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle::new(i * 60, 1.0, 2.0, 0.5, 1.5, 1.0))
            .collect()
    }

    #[tokio::test]
    async fn test_since_and_limit() {
        let mock = MockExchange::new();
        mock.push_candles("BTC/USDT", Timeframe::M1, &series(10));

        let latest = mock.fetch_candles("BTC/USDT", Timeframe::M1, None, 3).await.unwrap();
        assert_eq!(latest.len(), 3);
        assert_eq!(latest[0].fields()[0], serde_json::json!(420));

        let from = mock
            .fetch_candles("BTC/USDT", Timeframe::M1, Some(100), 2)
            .await
            .unwrap();
        assert_eq!(from[0].fields()[0], serde_json::json!(120));
        assert_eq!(from.len(), 2);
        assert_eq!(mock.candle_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failures_then_recovery() {
        let mock = MockExchange::new();
        mock.push_candles("ETH/USDT", Timeframe::M5, &series(1));
        mock.fail_next("ETH/USDT", ExchangeError::Timeout("slow".into()), 2);

        for _ in 0..2 {
            let err = mock
                .fetch_candles("ETH/USDT", Timeframe::M5, None, 1)
                .await
                .unwrap_err();
            assert!(err.is_transient());
        }
        assert!(mock.fetch_candles("ETH/USDT", Timeframe::M5, None, 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_batch_partial() {
        let mock = MockExchange::new();
        mock.set_price(PriceTick {
            symbol: "BTC/USDT".into(),
            price: 1.0,
            volume_24h: None,
            change_24h: None,
            change_pct_24h: None,
            timestamp: 0,
        });
        mock.mark_invalid("FOO/BAR");

        let symbols = vec!["BTC/USDT".to_string(), "FOO/BAR".to_string()];
        let batch = mock.fetch_tickers(&symbols).await.unwrap();
        assert!(batch.ticks.contains_key("BTC/USDT"));
        assert!(batch.errors.contains_key("FOO/BAR"));
    }
}
