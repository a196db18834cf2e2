//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Exchange error: {0}")]
    Exchange(#[from] kline_exchange::ExchangeError),

    #[error("Store error: {0}")]
    Store(#[from] kline_store::StoreError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] kline_ingest::IngestError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] kline_scheduler::SchedulerError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] kline_telemetry::TelemetryError),

    #[error("Preflight error: {0}")]
    Preflight(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
