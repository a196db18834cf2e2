//! Job definitions and execution records.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Timelike, Utc};
use kline_core::BoxFuture;
use serde::Serialize;
use uuid::Uuid;

use crate::error::SchedulerResult;
use crate::resources::ResourceSnapshot;

/// When a job is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Fixed interval; the first run is one interval after registration.
    Every(Duration),
    /// Once an hour at the given minute (UTC).
    HourlyAt { minute: u32 },
    /// Once a day at the given time (UTC).
    DailyAt(NaiveTime),
}

impl Cadence {
    /// First due time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Cadence::Every(interval) => {
                let step = ChronoDuration::from_std(interval)
                    .unwrap_or_else(|_| ChronoDuration::seconds(1))
                    .max(ChronoDuration::seconds(1));
                now + step
            }
            Cadence::HourlyAt { minute } => {
                let minute = minute.min(59);
                let this_hour = now
                    .with_minute(minute)
                    .and_then(|t| t.with_second(0))
                    .and_then(|t| t.with_nanosecond(0))
                    .unwrap_or(now);
                if this_hour > now {
                    this_hour
                } else {
                    this_hour + ChronoDuration::hours(1)
                }
            }
            Cadence::DailyAt(time) => {
                let today = now.date_naive().and_time(time).and_utc();
                if today > now {
                    today
                } else {
                    today + ChronoDuration::days(1)
                }
            }
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Every(d) => write!(f, "every {}s", d.as_secs()),
            Cadence::HourlyAt { minute } => write!(f, "hourly at :{minute:02}"),
            Cadence::DailyAt(t) => write!(f, "daily at {}", t.format("%H:%M")),
        }
    }
}

/// Work run by a job.
pub trait JobAction: Send + Sync {
    fn run(&self) -> BoxFuture<'static, SchedulerResult<()>>;
}

struct FnAction<F>(F);

impl<F, Fut> JobAction for FnAction<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = SchedulerResult<()>> + Send + 'static,
{
    fn run(&self) -> BoxFuture<'static, SchedulerResult<()>> {
        Box::pin((self.0)())
    }
}

/// Wrap an async closure as a job action.
pub fn job_fn<F, Fut>(f: F) -> Arc<dyn JobAction>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SchedulerResult<()>> + Send + 'static,
{
    Arc::new(FnAction(f))
}

/// A registered recurring job.
#[derive(Clone)]
pub struct JobSpec {
    pub name: String,
    pub cadence: Cadence,
    pub tags: Vec<String>,
    pub action: Arc<dyn JobAction>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, cadence: Cadence, action: Arc<dyn JobAction>) -> Self {
        Self {
            name: name.into(),
            cadence,
            tags: Vec::new(),
            action,
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }
}

impl fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSpec")
            .field("name", &self.name)
            .field("cadence", &self.cadence)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Skipped
        )
    }
}

/// Why a due job was not dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The previous run of the same job has not finished.
    AlreadyRunning,
    ConsecutiveFailures(u32),
    ResourceConstrained(Vec<String>),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyRunning => write!(f, "previous run still in progress"),
            SkipReason::ConsecutiveFailures(n) => {
                write!(f, "too many consecutive failures ({n})")
            }
            SkipReason::ResourceConstrained(warnings) => {
                write!(f, "resource constraints: {}", warnings.join(", "))
            }
        }
    }
}

/// One run (or skipped run) of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobExecution {
    pub id: Uuid,
    pub job_name: String,
    pub scheduled_time: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub duration_seconds: f64,
    pub error_message: Option<String>,
    pub resources: Option<ResourceSnapshot>,
}

impl JobExecution {
    pub fn pending(job_name: &str, scheduled_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            scheduled_time,
            started_at: None,
            completed_at: None,
            status: JobStatus::Pending,
            duration_seconds: 0.0,
            error_message: None,
            resources: None,
        }
    }

    pub fn skipped(job_name: &str, scheduled_time: DateTime<Utc>, reason: &SkipReason) -> Self {
        Self {
            status: JobStatus::Skipped,
            error_message: Some(reason.to_string()),
            ..Self::pending(job_name, scheduled_time)
        }
    }
}
