//! Observability for the kline collector.
//!
//! - Structured logging with tracing (JSON in production)
//! - Prometheus metrics with a text exposition renderer
//! - `Statistics`: in-process collection counters with snapshots

pub mod error;
pub mod logging;
pub mod metrics;
pub mod statistics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use statistics::{Statistics, StatisticsSnapshot, SymbolStats};
