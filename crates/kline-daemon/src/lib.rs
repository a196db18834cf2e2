//! Scheduled OHLCV and price collector.
//!
//! Wires the collector components together:
//! - Exchange client and rate limiter
//! - Candle store (JSON Lines or in-memory)
//! - Ingestion engine with gap backfill
//! - Resource-aware scheduler running the collection jobs
//! - HTTP status server (`/health`, `/status`, `/stats`, `/metrics`)

pub mod app;
pub mod config;
pub mod error;
pub mod http;
pub mod jobs;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
