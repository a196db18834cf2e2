//! Shared fixtures.

use std::sync::Arc;

use kline_core::{Candle, ManualClock, PriceTick, Timeframe};
use kline_exchange::{MockExchange, RateLimiter, RateLimiterConfig};
use kline_ingest::{IngestConfig, IngestionEngine};
use kline_store::CandleStore;

pub const BTC: &str = "BTC/USDT";
pub const ETH: &str = "ETH/USDT";

/// `count` consistent candles starting at `from`.
pub fn series(from: i64, count: i64, interval: i64) -> Vec<Candle> {
    (0..count)
        .map(|i| {
            let base = 100.0 + i as f64;
            Candle::new(from + i * interval, base, base + 1.0, base - 1.0, base + 0.5, 10.0)
        })
        .collect()
}

pub fn tick(symbol: &str, price: f64, timestamp: i64) -> PriceTick {
    PriceTick {
        symbol: symbol.to_string(),
        price,
        volume_24h: Some(1_000.0),
        change_24h: Some(1.0),
        change_pct_24h: Some(0.5),
        timestamp,
    }
}

pub fn test_config() -> IngestConfig {
    IngestConfig {
        retry_backoff_ms: 1,
        ..Default::default()
    }
}

pub fn open_limiter() -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(RateLimiterConfig {
        max_calls_per_second: 10_000,
        max_calls_per_minute: 1_000_000,
        burst_protection: false,
    }))
}

pub fn build_engine(
    config: IngestConfig,
    exchange: Arc<MockExchange>,
    store: Arc<dyn CandleStore>,
    symbols: &[&str],
    timeframes: Vec<Timeframe>,
    clock: Arc<ManualClock>,
) -> Arc<IngestionEngine> {
    Arc::new(
        IngestionEngine::new(config, exchange, store)
            .with_universe(symbols.iter().map(|s| s.to_string()).collect(), timeframes)
            .with_rate_limiter(open_limiter())
            .with_clock(clock),
    )
}
