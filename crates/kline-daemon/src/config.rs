//! Application configuration.

use crate::error::{AppError, AppResult};
use chrono::NaiveTime;
use kline_core::{normalize_symbol, Timeframe};
use kline_exchange::{RateLimiterConfig, RestClientConfig};
use kline_ingest::{CacheConfig, IngestConfig};
use kline_scheduler::{ResourceThresholds, SchedulerConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Environment variable overriding the config path.
pub const CONFIG_ENV: &str = "KLINE_CONFIG";

/// Where candles and prices are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Append-only JSON Lines files under `data_dir`.
    #[default]
    Jsonl,
    /// Process memory only; lost on exit.
    Memory,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Default: "./data".
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Rows older than this are deleted by the daily cleanup. Default: 30.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_retention_days() -> u32 {
    30
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: default_data_dir(),
            retention_days: default_retention_days(),
        }
    }
}

/// Job cadences plus scheduler internals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Shortest interval between two runs of a candle job (s). Each
    /// timeframe otherwise runs once per candle. Default: 60.
    #[serde(default = "default_collection_interval_secs")]
    pub collection_interval_secs: u64,
    /// Price batch interval (s). Default: 30.
    #[serde(default = "default_price_interval_secs")]
    pub price_interval_secs: u64,
    /// Resource check interval (s). Default: 600.
    #[serde(default = "default_resource_check_interval_secs")]
    pub resource_check_interval_secs: u64,
    /// Minute past each hour for the gap audit. Default: 30.
    #[serde(default = "default_gap_fill_minute")]
    pub gap_fill_minute: u32,
    /// Daily cleanup time, "HH:MM" UTC. Default: "00:00".
    #[serde(default = "default_cleanup_time")]
    pub cleanup_time: String,
    #[serde(flatten)]
    pub core: SchedulerConfig,
}

fn default_collection_interval_secs() -> u64 {
    60
}

fn default_price_interval_secs() -> u64 {
    30
}

fn default_resource_check_interval_secs() -> u64 {
    600
}

fn default_gap_fill_minute() -> u32 {
    30
}

fn default_cleanup_time() -> String {
    "00:00".to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            collection_interval_secs: default_collection_interval_secs(),
            price_interval_secs: default_price_interval_secs(),
            resource_check_interval_secs: default_resource_check_interval_secs(),
            gap_fill_minute: default_gap_fill_minute(),
            cleanup_time: default_cleanup_time(),
            core: SchedulerConfig::default(),
        }
    }
}

impl ScheduleConfig {
    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs)
    }

    pub fn price_interval(&self) -> Duration {
        Duration::from_secs(self.price_interval_secs)
    }

    pub fn resource_check_interval(&self) -> Duration {
        Duration::from_secs(self.resource_check_interval_secs)
    }

    pub fn cleanup_time(&self) -> AppResult<NaiveTime> {
        NaiveTime::parse_from_str(&self.cleanup_time, "%H:%M").map_err(|e| {
            AppError::Config(format!(
                "Invalid cleanup_time '{}' (expected HH:MM): {e}",
                self.cleanup_time
            ))
        })
    }
}

/// HTTP status server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Default: true.
    #[serde(default = "default_http_enabled")]
    pub http_enabled: bool,
    /// Default: 9090.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

fn default_http_enabled() -> bool {
    true
}

fn default_http_port() -> u16 {
    9090
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            http_enabled: default_http_enabled(),
            http_port: default_http_port(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Instruments as BASE/QUOTE.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<Timeframe>,
    #[serde(default)]
    pub exchange: RestClientConfig,
    #[serde(default)]
    pub rate_limit: RateLimiterConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub scheduler: ScheduleConfig,
    #[serde(default)]
    pub resources: ResourceThresholds,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_symbols() -> Vec<String> {
    vec![
        "BTC/USDT".to_string(),
        "ETH/USDT".to_string(),
        "BNB/USDT".to_string(),
    ]
}

fn default_timeframes() -> Vec<Timeframe> {
    vec![Timeframe::M1, Timeframe::M5, Timeframe::M15]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            timeframes: default_timeframes(),
            exchange: RestClientConfig::default(),
            rate_limit: RateLimiterConfig::default(),
            cache: CacheConfig::default(),
            ingest: IngestConfig::default(),
            scheduler: ScheduleConfig::default(),
            resources: ResourceThresholds::default(),
            storage: StorageConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, falling back to defaults if the file is missing.
    pub fn load(path: &str) -> AppResult<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            tracing::warn!(path = %path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Symbols in canonical BASE/QUOTE form, duplicates removed.
    pub fn normalized_symbols(&self) -> AppResult<Vec<String>> {
        let mut symbols: Vec<String> = Vec::with_capacity(self.symbols.len());
        for raw in &self.symbols {
            let symbol = normalize_symbol(raw).map_err(|e| AppError::Config(e.to_string()))?;
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }
        Ok(symbols)
    }

    /// Reject settings the collector cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        if self.symbols.is_empty() {
            return Err(AppError::Config("symbols must not be empty".into()));
        }
        self.normalized_symbols()?;

        if self.timeframes.is_empty() {
            return Err(AppError::Config("timeframes must not be empty".into()));
        }

        let positive = [
            ("rate_limit.max_calls_per_second", u64::from(self.rate_limit.max_calls_per_second)),
            ("rate_limit.max_calls_per_minute", u64::from(self.rate_limit.max_calls_per_minute)),
            ("ingest.max_workers", self.ingest.max_workers as u64),
            ("ingest.task_timeout_secs", self.ingest.task_timeout_secs),
            ("ingest.initial_history_candles", u64::from(self.ingest.initial_history_candles)),
            ("ingest.max_candles_per_request", u64::from(self.ingest.max_candles_per_request)),
            ("ingest.max_attempts", u64::from(self.ingest.max_attempts)),
            ("scheduler.collection_interval_secs", self.scheduler.collection_interval_secs),
            ("scheduler.price_interval_secs", self.scheduler.price_interval_secs),
            ("scheduler.resource_check_interval_secs", self.scheduler.resource_check_interval_secs),
            ("scheduler.max_workers", self.scheduler.core.max_workers as u64),
            ("scheduler.max_consecutive_failures", u64::from(self.scheduler.core.max_consecutive_failures)),
            ("scheduler.history_capacity", self.scheduler.core.history_capacity as u64),
            ("storage.retention_days", u64::from(self.storage.retention_days)),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(AppError::Config(format!("{name} must be greater than 0")));
        }

        if self.scheduler.gap_fill_minute > 59 {
            return Err(AppError::Config(format!(
                "scheduler.gap_fill_minute must be 0-59, got {}",
                self.scheduler.gap_fill_minute
            )));
        }
        self.scheduler.cleanup_time()?;
        Ok(())
    }
}
