//! Bounded execution history.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::job::{JobExecution, JobStatus};

/// Aggregates over the last 24 hours of executions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub last_24h_executions: usize,
    pub success_rate_percent: f64,
    pub failed_executions: usize,
    pub skipped_executions: usize,
    pub average_duration_seconds: f64,
    pub execution_frequency_per_hour: f64,
}

/// Ring of finished executions; the oldest entry is evicted first.
#[derive(Debug)]
pub struct ExecutionHistory {
    entries: VecDeque<JobExecution>,
    capacity: usize,
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append a finished execution, evicting the oldest at capacity.
    /// Pending or running executions are not recorded.
    pub fn push(&mut self, execution: JobExecution) -> bool {
        if !execution.status.is_terminal() {
            return false;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(execution);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Up to `n` most recent executions, oldest first.
    pub fn recent(&self, n: usize) -> Vec<JobExecution> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn all(&self) -> Vec<JobExecution> {
        self.entries.iter().cloned().collect()
    }

    pub fn performance(&self, now: DateTime<Utc>) -> PerformanceMetrics {
        let cutoff = now - Duration::hours(24);
        let recent: Vec<&JobExecution> = self
            .entries
            .iter()
            .filter(|e| e.scheduled_time >= cutoff)
            .collect();
        if recent.is_empty() {
            return PerformanceMetrics::default();
        }

        let count = |status: JobStatus| recent.iter().filter(|e| e.status == status).count();
        let completed = count(JobStatus::Completed);

        let durations: Vec<f64> = recent
            .iter()
            .filter(|e| e.status == JobStatus::Completed && e.duration_seconds > 0.0)
            .map(|e| e.duration_seconds)
            .collect();
        let average = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };

        PerformanceMetrics {
            last_24h_executions: recent.len(),
            success_rate_percent: round2(completed as f64 / recent.len() as f64 * 100.0),
            failed_executions: count(JobStatus::Failed),
            skipped_executions: count(JobStatus::Skipped),
            average_duration_seconds: round2(average),
            execution_frequency_per_hour: round2(recent.len() as f64 / 24.0),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
