//! Scheduler and resource gate settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Consecutive failures after which a job is skipped. Default: 3.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// Jobs running at once. Default: 3.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Executions kept in history. Default: 1000.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Wait for in-flight jobs on stop (s). Default: 30.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Pause after a failed scheduling tick (s). Default: 10.
    #[serde(default = "default_loop_error_backoff_secs")]
    pub loop_error_backoff_secs: u64,
    /// Scheduling tick period (ms). Default: 1000.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_max_workers() -> usize {
    3
}

fn default_history_capacity() -> usize {
    1000
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_loop_error_backoff_secs() -> u64 {
    10
}

fn default_tick_interval_ms() -> u64 {
    1000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: default_max_consecutive_failures(),
            max_workers: default_max_workers(),
            history_capacity: default_history_capacity(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            loop_error_backoff_secs: default_loop_error_backoff_secs(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn loop_error_backoff(&self) -> Duration {
        Duration::from_secs(self.loop_error_backoff_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Limits above which the resource gate denies dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceThresholds {
    /// Default: 80.
    #[serde(default = "default_max_cpu_percent")]
    pub max_cpu_percent: f64,
    /// Default: 85.
    #[serde(default = "default_max_memory_percent")]
    pub max_memory_percent: f64,
    /// Default: 1 GiB.
    #[serde(default = "default_min_disk_free_bytes")]
    pub min_disk_free_bytes: u64,
}

fn default_max_cpu_percent() -> f64 {
    80.0
}

fn default_max_memory_percent() -> f64 {
    85.0
}

fn default_min_disk_free_bytes() -> u64 {
    1024 * 1024 * 1024
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            max_cpu_percent: default_max_cpu_percent(),
            max_memory_percent: default_max_memory_percent(),
            min_disk_free_bytes: default_min_disk_free_bytes(),
        }
    }
}
