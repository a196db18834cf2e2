//! Scheduler error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler is not running")]
    NotRunning,

    #[error("Job already registered: {0}")]
    DuplicateJob(String),

    #[error("Job failed: {0}")]
    Job(String),

    #[error("Resource sampling failed: {0}")]
    Resource(String),
}

impl SchedulerError {
    /// Wrap any displayable error as a job failure.
    pub fn job(err: impl std::fmt::Display) -> Self {
        SchedulerError::Job(err.to_string())
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
