//! Exchange access for the kline collector.
//!
//! - `ExchangeClient`: dyn-compatible market-data trait
//! - `RestExchangeClient`: REST implementation for Binance-compatible APIs
//! - `MockExchange`: scripted in-memory exchange for tests
//! - `RateLimiter`: 1 s / 60 s sliding windows with burst smoothing
//! - `TtlCache`: short-TTL concurrent cache

pub mod cache;
pub mod client;
pub mod error;
pub mod mock;
pub mod rate_limiter;
pub mod rest;

pub use cache::{CacheStats, TtlCache};
pub use client::{BoxFuture, ExchangeClient, TickerBatch};
pub use error::{ExchangeError, ExchangeResult};
pub use mock::{CandleRequest, MockExchange};
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterStats};
pub use rest::{exchange_symbol, RestClientConfig, RestExchangeClient};
