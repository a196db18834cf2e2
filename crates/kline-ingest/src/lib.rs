//! Candle and price ingestion for the kline collector.
//!
//! - `IngestionEngine`: bounded-concurrency fetch, validate, dedupe, store
//! - `GapDetector`: finds missing slots and drives backfill
//! - `IngestConfig` / `CacheConfig`: engine settings

pub mod config;
pub mod engine;
pub mod error;
pub mod gap;

pub use config::{CacheConfig, IngestConfig};
pub use engine::{CycleResult, IngestionEngine, PairResult, PriceResult};
pub use error::{IngestError, IngestResult};
pub use gap::{GapDetector, GapReport};
