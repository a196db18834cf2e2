//! Shared fixtures.

use std::sync::Arc;

use chrono::Utc;
use kline_core::{Candle, PriceTick, Timeframe};
use kline_daemon::config::StorageBackend;
use kline_daemon::{AppConfig, Application};
use kline_exchange::MockExchange;
use kline_scheduler::StaticSampler;
use kline_store::{CandleStore, MemoryStore};

pub const BTC: &str = "BTC/USDT";
pub const ETH: &str = "ETH/USDT";
pub const UNLISTED: &str = "NOPE/USDT";

/// Config with fast limits and an in-memory store.
pub fn test_config(symbols: &[&str]) -> AppConfig {
    let mut config = AppConfig::default();
    config.symbols = symbols.iter().map(|s| s.to_string()).collect();
    config.timeframes = vec![Timeframe::M1];
    config.rate_limit.max_calls_per_second = 10_000;
    config.rate_limit.max_calls_per_minute = 1_000_000;
    config.rate_limit.burst_protection = false;
    config.ingest.retry_backoff_ms = 1;
    config.storage.backend = StorageBackend::Memory;
    config.telemetry.http_enabled = false;
    config
}

/// `count` one-minute candles ending just before the current minute.
pub fn recent_series(count: i64) -> Vec<Candle> {
    let now = Utc::now().timestamp();
    let start = now - now % 60 - count * 60;
    (0..count)
        .map(|i| {
            let base = 100.0 + i as f64;
            Candle::new(start + i * 60, base, base + 1.0, base - 1.0, base + 0.5, 10.0)
        })
        .collect()
}

pub fn tick(symbol: &str, price: f64) -> PriceTick {
    PriceTick {
        symbol: symbol.to_string(),
        price,
        volume_24h: Some(1_000.0),
        change_24h: None,
        change_pct_24h: None,
        timestamp: Utc::now().timestamp(),
    }
}

/// Exchange serving BTC and ETH with `UNLISTED` rejected.
pub fn seeded_exchange() -> Arc<MockExchange> {
    let exchange = Arc::new(MockExchange::new());
    exchange.push_candles(BTC, Timeframe::M1, &recent_series(20));
    exchange.push_candles(ETH, Timeframe::M1, &recent_series(20));
    exchange.set_price(tick(BTC, 50_000.0));
    exchange.set_price(tick(ETH, 3_000.0));
    exchange.mark_invalid(UNLISTED);
    exchange
}

pub fn build_app(
    config: AppConfig,
    exchange: Arc<MockExchange>,
) -> (Application, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let app = Application::with_components(
        config,
        exchange,
        Arc::clone(&store) as Arc<dyn CandleStore>,
        Box::new(StaticSampler::idle()),
    )
    .expect("valid test config");
    (app, store)
}
