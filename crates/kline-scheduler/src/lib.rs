//! Resource-aware job scheduler for the kline collector.
//!
//! - `Scheduler`: once-per-tick due check, bounded worker pool, history
//! - `ResourceGate`: CPU, memory and disk headroom check (fails open)
//! - `FailureTracker`: per-job consecutive failure counters
//! - `Cadence` / `JobSpec`: recurring job definitions

pub mod config;
pub mod error;
pub mod failures;
pub mod history;
pub mod job;
pub mod resources;
pub mod scheduler;

pub use config::{ResourceThresholds, SchedulerConfig};
pub use error::{SchedulerError, SchedulerResult};
pub use failures::FailureTracker;
pub use history::{ExecutionHistory, PerformanceMetrics};
pub use job::{job_fn, Cadence, JobAction, JobExecution, JobSpec, JobStatus, SkipReason};
pub use resources::{
    ResourceGate, ResourceSample, ResourceSampler, ResourceSnapshot, StaticSampler, SystemSampler,
};
pub use scheduler::{JobInfo, Scheduler, SchedulerStatus};
