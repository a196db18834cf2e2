//! Cooperative job scheduler.
//!
//! One loop task evaluates every registered job once per tick. For each due
//! job it checks, in order:
//! 1. the job's consecutive failure count against `max_consecutive_failures`
//! 2. the resource gate (sampled at most once per tick)
//!
//! and either records a `Skipped` execution or hands the job to a bounded
//! worker pool. The loop never waits for a job to finish.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use kline_telemetry::Metrics;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::failures::FailureTracker;
use crate::history::{ExecutionHistory, PerformanceMetrics};
use crate::job::{JobExecution, JobSpec, JobStatus, SkipReason};
use crate::resources::{ResourceGate, ResourceSnapshot};

const RECENT_EXECUTIONS: usize = 10;

/// Registered job with its next due time.
struct ScheduledJob {
    spec: JobSpec,
    next_run: DateTime<Utc>,
}

struct Lifecycle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Public view of one registered job.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub name: String,
    pub tags: Vec<String>,
    pub cadence: String,
    pub next_run: DateTime<Utc>,
    pub consecutive_failures: u32,
}

/// Scheduler state for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub jobs: Vec<JobInfo>,
    pub resources: Option<ResourceSnapshot>,
    pub recent_executions: Vec<JobExecution>,
    pub in_flight: Vec<JobExecution>,
    pub history_len: usize,
    pub performance: PerformanceMetrics,
}

pub struct Scheduler {
    config: SchedulerConfig,
    gate: Arc<ResourceGate>,
    jobs: Mutex<Vec<ScheduledJob>>,
    failures: FailureTracker,
    history: Mutex<ExecutionHistory>,
    in_flight: Mutex<HashMap<Uuid, JobExecution>>,
    workers: Arc<Semaphore>,
    tracker: TaskTracker,
    lifecycle: Mutex<Option<Lifecycle>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, gate: Arc<ResourceGate>) -> Self {
        Self {
            history: Mutex::new(ExecutionHistory::new(config.history_capacity)),
            workers: Arc::new(Semaphore::new(config.max_workers.max(1))),
            jobs: Mutex::new(Vec::new()),
            failures: FailureTracker::new(),
            in_flight: Mutex::new(HashMap::new()),
            tracker: TaskTracker::new(),
            lifecycle: Mutex::new(None),
            config,
            gate,
        }
    }

    /// Register a job. Its first run is the cadence's next slot after now.
    pub fn register(&self, spec: JobSpec) -> SchedulerResult<()> {
        let mut jobs = self.jobs.lock();
        if jobs.iter().any(|j| j.spec.name == spec.name) {
            return Err(SchedulerError::DuplicateJob(spec.name));
        }

        let next_run = spec.cadence.next_after(Utc::now());
        info!(
            job = %spec.name,
            cadence = %spec.cadence,
            tags = ?spec.tags,
            %next_run,
            "Job registered"
        );
        jobs.push(ScheduledJob { spec, next_run });
        Ok(())
    }

    /// Shared handle to the failure counters.
    pub fn failures(&self) -> FailureTracker {
        self.failures.clone()
    }

    pub fn reset_failures(&self, job: &str) {
        self.failures.reset(job);
        Metrics::job_failures(job, 0);
    }

    pub fn reset_all_failures(&self) {
        for job in self.failures.snapshot().keys() {
            Metrics::job_failures(job, 0);
        }
        self.failures.reset_all();
    }

    pub fn gate(&self) -> &Arc<ResourceGate> {
        &self.gate
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.lock().is_some()
    }

    /// Evaluate every job against `now` and dispatch the due ones.
    ///
    /// Returns the number of jobs handed to the worker pool.
    pub async fn tick(self: &Arc<Self>, now: DateTime<Utc>) -> usize {
        let due: Vec<JobSpec> = {
            let mut jobs = self.jobs.lock();
            jobs.iter_mut()
                .filter(|j| j.next_run <= now)
                .map(|j| {
                    j.next_run = j.spec.cadence.next_after(now);
                    j.spec.clone()
                })
                .collect()
        };
        if due.is_empty() {
            return 0;
        }

        let mut sampled: Option<ResourceSnapshot> = None;
        let mut dispatched = 0;

        for spec in due {
            if self.is_in_flight(&spec.name) {
                self.skip(&spec.name, now, SkipReason::AlreadyRunning);
                continue;
            }

            let failures = self.failures.get(&spec.name);
            if failures >= self.config.max_consecutive_failures {
                self.skip(&spec.name, now, SkipReason::ConsecutiveFailures(failures));
                continue;
            }

            let resources = match &sampled {
                Some(snapshot) => snapshot.clone(),
                None => {
                    let snapshot = self.gate.check().await;
                    sampled = Some(snapshot.clone());
                    snapshot
                }
            };
            if !resources.should_proceed {
                self.skip(
                    &spec.name,
                    now,
                    SkipReason::ResourceConstrained(resources.warnings.clone()),
                );
                continue;
            }

            self.dispatch(spec, now, resources);
            dispatched += 1;
        }
        dispatched
    }

    fn is_in_flight(&self, job: &str) -> bool {
        self.in_flight.lock().values().any(|e| e.job_name == job)
    }

    fn skip(&self, job: &str, now: DateTime<Utc>, reason: SkipReason) {
        warn!(%job, %reason, "Job skipped");
        Metrics::job_finished(job, JobStatus::Skipped.as_str(), None);
        self.history
            .lock()
            .push(JobExecution::skipped(job, now, &reason));
    }

    fn dispatch(self: &Arc<Self>, spec: JobSpec, now: DateTime<Utc>, resources: ResourceSnapshot) {
        let mut execution = JobExecution::pending(&spec.name, now);
        execution.resources = Some(resources);
        self.in_flight
            .lock()
            .insert(execution.id, execution.clone());

        debug!(job = %spec.name, id = %execution.id, "Job dispatched");
        let scheduler = Arc::clone(self);
        self.tracker
            .spawn(async move { scheduler.execute(spec, execution).await });
    }

    async fn execute(self: Arc<Self>, spec: JobSpec, mut execution: JobExecution) {
        let _permit = match Arc::clone(&self.workers).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                execution.status = JobStatus::Failed;
                execution.error_message = Some(e.to_string());
                self.finish(execution);
                return;
            }
        };

        execution.status = JobStatus::Running;
        execution.started_at = Some(Utc::now());
        self.in_flight
            .lock()
            .insert(execution.id, execution.clone());
        Metrics::job_started();

        let started = Instant::now();
        let outcome = match tokio::spawn(spec.action.run()).await {
            Ok(result) => result,
            Err(e) => Err(SchedulerError::Job(format!("job task aborted: {e}"))),
        };
        let duration = started.elapsed().as_secs_f64();

        Metrics::job_ended();
        execution.completed_at = Some(Utc::now());
        execution.duration_seconds = duration;

        match outcome {
            Ok(()) => {
                execution.status = JobStatus::Completed;
                self.failures.record_success(&spec.name);
                Metrics::job_failures(&spec.name, 0);
                info!(job = %spec.name, duration_secs = duration, "Job completed");
            }
            Err(e) => {
                execution.status = JobStatus::Failed;
                execution.error_message = Some(e.to_string());
                let failures = self.failures.record_failure(&spec.name);
                Metrics::job_failures(&spec.name, failures);
                error!(
                    job = %spec.name,
                    duration_secs = duration,
                    consecutive_failures = failures,
                    error = %e,
                    "Job failed"
                );
            }
        }

        Metrics::job_finished(&spec.name, execution.status.as_str(), Some(duration));
        self.finish(execution);
    }

    fn finish(&self, execution: JobExecution) {
        self.in_flight.lock().remove(&execution.id);
        self.history.lock().push(execution);
    }

    /// Start the scheduling loop.
    pub fn start(self: &Arc<Self>) -> SchedulerResult<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.is_some() {
                return Err(SchedulerError::AlreadyRunning);
            }

            self.tracker.reopen();
            let token = CancellationToken::new();
            let scheduler = Arc::clone(self);
            let loop_token = token.clone();
            let handle = tokio::spawn(async move { scheduler.run_loop(loop_token).await });
            *lifecycle = Some(Lifecycle { token, handle });
        }

        info!(jobs = self.jobs.lock().len(), "Scheduler started");
        Ok(())
    }

    async fn run_loop(self: Arc<Self>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Scheduler loop started");

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // A panicking tick is contained in its own task.
            let scheduler = Arc::clone(&self);
            let tick = tokio::spawn(async move { scheduler.tick(Utc::now()).await });
            if let Err(e) = tick.await {
                error!(error = %e, "Scheduling tick failed");
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(self.config.loop_error_backoff()) => {}
                }
            }
        }

        info!("Scheduler loop terminated");
    }

    /// Stop dispatching and wait (bounded) for in-flight jobs.
    pub async fn stop(&self) -> SchedulerResult<()> {
        let lifecycle = self.lifecycle.lock().take();
        let Some(lifecycle) = lifecycle else {
            return Err(SchedulerError::NotRunning);
        };

        info!("Stopping scheduler");
        lifecycle.token.cancel();
        if let Err(e) = lifecycle.handle.await {
            warn!(error = %e, "Scheduler loop ended abnormally");
        }

        self.tracker.close();
        let timeout = self.config.shutdown_timeout();
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            warn!(
                in_flight = self.in_flight.lock().len(),
                timeout_secs = timeout.as_secs(),
                "Timed out waiting for in-flight jobs"
            );
        }

        info!("Scheduler stopped");
        Ok(())
    }

    /// Wait until every dispatched job has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Every retained execution, oldest first.
    pub fn history(&self) -> Vec<JobExecution> {
        self.history.lock().all()
    }

    pub fn status(&self) -> SchedulerStatus {
        let failures = self.failures.snapshot();
        let jobs = self
            .jobs
            .lock()
            .iter()
            .map(|j| JobInfo {
                name: j.spec.name.clone(),
                tags: j.spec.tags.clone(),
                cadence: j.spec.cadence.to_string(),
                next_run: j.next_run,
                consecutive_failures: failures.get(&j.spec.name).copied().unwrap_or(0),
            })
            .collect();

        let mut in_flight: Vec<JobExecution> = self.in_flight.lock().values().cloned().collect();
        in_flight.sort_by_key(|e| e.scheduled_time);

        let (recent_executions, history_len, performance) = {
            let history = self.history.lock();
            (
                history.recent(RECENT_EXECUTIONS),
                history.len(),
                history.performance(Utc::now()),
            )
        };

        SchedulerStatus {
            running: self.is_running(),
            jobs,
            resources: self.gate.last(),
            recent_executions,
            in_flight,
            history_len,
            performance,
        }
    }

    /// Consecutive failure counts per job.
    pub fn consecutive_failures(&self) -> BTreeMap<String, u32> {
        self.failures.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceThresholds;
    use crate::job::{job_fn, Cadence};
    use crate::resources::{ResourceSample, StaticSampler};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn scheduler_with(sampler: StaticSampler) -> Arc<Scheduler> {
        let gate = Arc::new(ResourceGate::new(
            ResourceThresholds::default(),
            Box::new(sampler),
        ));
        Arc::new(Scheduler::new(SchedulerConfig::default(), gate))
    }

    fn counting_job(name: &str, calls: Arc<AtomicUsize>, fail: bool) -> JobSpec {
        JobSpec::new(
            name,
            Cadence::Every(Duration::from_secs(60)),
            job_fn(move || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if fail {
                        Err(SchedulerError::Job("boom".into()))
                    } else {
                        Ok(())
                    }
                }
            }),
        )
    }

    fn statuses(scheduler: &Scheduler) -> Vec<JobStatus> {
        scheduler.history().into_iter().map(|e| e.status).collect()
    }

    #[tokio::test]
    async fn test_job_not_due_before_first_interval() {
        let scheduler = scheduler_with(StaticSampler::idle());
        let calls = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(counting_job("a", calls.clone(), false))
            .unwrap();

        assert_eq!(scheduler.tick(Utc::now()).await, 0);
        assert!(scheduler.history().is_empty());
    }

    #[tokio::test]
    async fn test_successful_job_completes() {
        let scheduler = scheduler_with(StaticSampler::idle());
        let calls = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(counting_job("a", calls.clone(), false))
            .unwrap();

        let now = Utc::now() + chrono::Duration::seconds(120);
        assert_eq!(scheduler.tick(now).await, 1);
        scheduler.wait_idle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let history = scheduler.history();
        assert_eq!(history[0].status, JobStatus::Completed);
        assert!(history[0].started_at.is_some());
        assert!(history[0].resources.is_some());
        assert!(scheduler.status().in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_skipped_after_three_consecutive_failures() {
        let scheduler = scheduler_with(StaticSampler::idle());
        let calls = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(counting_job("always_fails", calls.clone(), true))
            .unwrap();

        let start = Utc::now();
        for i in 1..=4 {
            scheduler
                .tick(start + chrono::Duration::seconds(120 * i))
                .await;
            scheduler.wait_idle().await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            statuses(&scheduler),
            vec![
                JobStatus::Failed,
                JobStatus::Failed,
                JobStatus::Failed,
                JobStatus::Skipped
            ]
        );
        let skipped = scheduler.history().pop().unwrap();
        assert!(skipped
            .error_message
            .unwrap()
            .contains("consecutive failures"));
        assert_eq!(scheduler.consecutive_failures().get("always_fails"), Some(&3));
    }

    #[tokio::test]
    async fn test_reset_failures_resumes_dispatch() {
        let scheduler = scheduler_with(StaticSampler::idle());
        let calls = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(counting_job("flaky", calls.clone(), true))
            .unwrap();

        let start = Utc::now();
        for i in 1..=4 {
            scheduler
                .tick(start + chrono::Duration::seconds(120 * i))
                .await;
            scheduler.wait_idle().await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        scheduler.reset_failures("flaky");
        scheduler
            .tick(start + chrono::Duration::seconds(600))
            .await;
        scheduler.wait_idle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_due_job_skipped_while_previous_run_in_flight() {
        let scheduler = scheduler_with(StaticSampler::idle());
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(tokio::sync::Notify::new());
        let job = {
            let calls = Arc::clone(&calls);
            let release = Arc::clone(&release);
            JobSpec::new(
                "slow",
                Cadence::Every(Duration::from_secs(60)),
                job_fn(move || {
                    let calls = Arc::clone(&calls);
                    let release = Arc::clone(&release);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        Ok(())
                    }
                }),
            )
        };
        scheduler.register(job).unwrap();

        let start = Utc::now();
        assert_eq!(scheduler.tick(start + chrono::Duration::seconds(120)).await, 1);
        assert_eq!(scheduler.tick(start + chrono::Duration::seconds(240)).await, 0);

        let skipped = scheduler.history();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].status, JobStatus::Skipped);
        assert_eq!(
            skipped[0].error_message.as_deref(),
            Some("previous run still in progress")
        );
        assert_eq!(scheduler.status().in_flight.len(), 1);

        release.notify_one();
        scheduler.wait_idle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            statuses(&scheduler),
            vec![JobStatus::Skipped, JobStatus::Completed]
        );
        assert_eq!(scheduler.consecutive_failures().get("slow"), Some(&0));
    }

    #[tokio::test]
    async fn test_resource_constraint_skips_without_counting_failure() {
        let sampler = StaticSampler::new(ResourceSample {
            cpu_percent: 95.0,
            memory_percent: 20.0,
            disk_free_bytes: 50 * 1024 * 1024 * 1024,
        });
        let scheduler = scheduler_with(sampler);
        let calls = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(counting_job("a", calls.clone(), false))
            .unwrap();

        let now = Utc::now() + chrono::Duration::seconds(120);
        assert_eq!(scheduler.tick(now).await, 0);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let history = scheduler.history();
        assert_eq!(history[0].status, JobStatus::Skipped);
        assert!(history[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("High CPU usage: 95.0%"));
        assert_eq!(scheduler.consecutive_failures().get("a"), None);
    }

    #[tokio::test]
    async fn test_sampler_failure_still_dispatches() {
        let sampler = StaticSampler::idle();
        sampler.fail("no /proc");
        let scheduler = scheduler_with(sampler);
        let calls = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(counting_job("a", calls.clone(), false))
            .unwrap();

        let now = Utc::now() + chrono::Duration::seconds(120);
        assert_eq!(scheduler.tick(now).await, 1);
        scheduler.wait_idle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    async fn explode() -> SchedulerResult<()> {
        panic!("bad job")
    }

    #[tokio::test]
    async fn test_panicking_job_is_recorded_as_failed() {
        let scheduler = scheduler_with(StaticSampler::idle());
        scheduler
            .register(JobSpec::new(
                "panics",
                Cadence::Every(Duration::from_secs(60)),
                job_fn(explode),
            ))
            .unwrap();

        scheduler
            .tick(Utc::now() + chrono::Duration::seconds(120))
            .await;
        scheduler.wait_idle().await;

        assert_eq!(statuses(&scheduler), vec![JobStatus::Failed]);
        assert_eq!(scheduler.consecutive_failures().get("panics"), Some(&1));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let scheduler = scheduler_with(StaticSampler::idle());
        let calls = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(counting_job("a", calls.clone(), false))
            .unwrap();
        let err = scheduler
            .register(counting_job("a", calls, false))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateJob(_)));
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let scheduler = scheduler_with(StaticSampler::idle());
        assert!(matches!(
            scheduler.stop().await,
            Err(SchedulerError::NotRunning)
        ));

        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        assert!(matches!(
            scheduler.start(),
            Err(SchedulerError::AlreadyRunning)
        ));

        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running());
        assert!(!scheduler.status().running);
    }
}
