//! Ingestion settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ingestion engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Concurrent (symbol, timeframe) tasks. Default: 5.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Upper bound for one pair task, retries included (s). Default: 30.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    /// Strict candle validation. Default: false (lenient).
    #[serde(default)]
    pub strict_validation: bool,
    /// Candles requested for a series with no history. Default: 100.
    #[serde(default = "default_initial_history_candles")]
    pub initial_history_candles: u32,
    /// Upper bound for one candle request. Default: 500.
    #[serde(default = "default_max_candles_per_request")]
    pub max_candles_per_request: u32,
    /// Attempts per exchange call for transient errors. Default: 3.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Linear backoff step between attempts (ms). Default: 500.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Run a gap audit every N collection cycles; 0 disables. Default: 10.
    #[serde(default = "default_gap_audit_every_n_cycles")]
    pub gap_audit_every_n_cycles: u64,
    /// Gap audit lookback window (hours). Default: 24.
    #[serde(default = "default_gap_lookback_hours")]
    pub gap_lookback_hours: u64,
}

fn default_max_workers() -> usize {
    5
}

fn default_task_timeout_secs() -> u64 {
    30
}

fn default_initial_history_candles() -> u32 {
    100
}

fn default_max_candles_per_request() -> u32 {
    500
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_gap_audit_every_n_cycles() -> u64 {
    10
}

fn default_gap_lookback_hours() -> u64 {
    24
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            task_timeout_secs: default_task_timeout_secs(),
            strict_validation: false,
            initial_history_candles: default_initial_history_candles(),
            max_candles_per_request: default_max_candles_per_request(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            gap_audit_every_n_cycles: default_gap_audit_every_n_cycles(),
            gap_lookback_hours: default_gap_lookback_hours(),
        }
    }
}

impl IngestConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Cache lifetimes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Current price TTL (s). Default: 5.
    #[serde(default = "default_price_ttl_secs")]
    pub price_ttl_secs: u64,
    /// Symbol validity TTL (s). Default: 86,400.
    #[serde(default = "default_symbol_ttl_secs")]
    pub symbol_ttl_secs: u64,
}

fn default_price_ttl_secs() -> u64 {
    5
}

fn default_symbol_ttl_secs() -> u64 {
    86_400
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            price_ttl_secs: default_price_ttl_secs(),
            symbol_ttl_secs: default_symbol_ttl_secs(),
        }
    }
}
