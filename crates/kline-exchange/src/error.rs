//! Exchange error types.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited by exchange: {0}")]
    RateLimited(String),

    #[error("Exchange server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Request rejected (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    BadResponse(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

impl ExchangeError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::Network(_)
                | ExchangeError::Timeout(_)
                | ExchangeError::RateLimited(_)
                | ExchangeError::Server { .. }
        )
    }

    /// Stable label for statistics and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ExchangeError::Network(_) => "network",
            ExchangeError::Timeout(_) => "timeout",
            ExchangeError::RateLimited(_) => "rate_limited",
            ExchangeError::Server { .. } => "exchange_unavailable",
            ExchangeError::InvalidSymbol(_) => "invalid_symbol",
            ExchangeError::Auth(_) => "auth",
            ExchangeError::Rejected { .. } => "rejected",
            ExchangeError::BadResponse(_) => "bad_response",
            ExchangeError::HttpClient(_) => "http_client",
        }
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;
