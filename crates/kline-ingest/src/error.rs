//! Ingestion error types.

use std::time::Duration;

use kline_core::ValidationError;
use kline_exchange::ExchangeError;
use kline_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Price unavailable for {symbol}: {reason}")]
    PriceUnavailable { symbol: String, reason: String },

    #[error("Store write failed: {0}")]
    Store(#[from] StoreError),

    #[error("Task timed out after {0:?}")]
    Timeout(Duration),

    #[error("Task failed: {0}")]
    TaskFailed(String),
}

impl IngestError {
    /// Stable label for statistics and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Exchange(e) => e.kind(),
            IngestError::InvalidSymbol(_) => "invalid_symbol",
            IngestError::Validation(e) => e.kind(),
            IngestError::PriceUnavailable { .. } => "price_unavailable",
            IngestError::Store(_) => "store_write_failed",
            IngestError::Timeout(_) => "timeout",
            IngestError::TaskFailed(_) => "task_failed",
        }
    }

    pub fn is_invalid_symbol(&self) -> bool {
        self.kind() == "invalid_symbol"
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
