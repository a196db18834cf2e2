//! Host resource gate.
//!
//! Samples CPU, memory and free disk before jobs are dispatched. Sampling
//! is best effort: if it fails or stalls, the gate lets jobs through.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use kline_core::BoxFuture;
use kline_telemetry::Metrics;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sysinfo::{Disks, System, MINIMUM_CPU_UPDATE_INTERVAL};
use tracing::{debug, warn};

use crate::config::ResourceThresholds;
use crate::error::{SchedulerError, SchedulerResult};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Upper bound for one sample before the gate fails open.
const SAMPLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Raw host measurements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_free_bytes: u64,
}

/// Result of one gate check.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSnapshot {
    /// `None` when sampling failed.
    pub sample: Option<ResourceSample>,
    pub should_proceed: bool,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub sampled_at: DateTime<Utc>,
}

/// Source of host measurements.
pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> BoxFuture<'_, SchedulerResult<ResourceSample>>;
}

/// Samples the local host with `sysinfo`.
///
/// Free disk is read from the mount holding `data_dir`.
#[derive(Debug, Clone)]
pub struct SystemSampler {
    data_dir: PathBuf,
}

impl SystemSampler {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn sample_blocking(data_dir: &Path) -> SchedulerResult<ResourceSample> {
        let mut sys = System::new();
        sys.refresh_cpu();
        std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu();
        let cpu_percent = f64::from(sys.global_cpu_info().cpu_usage());

        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return Err(SchedulerError::Resource("total memory reported as 0".into()));
        }
        let memory_percent = sys.used_memory() as f64 / total as f64 * 100.0;

        let path = data_dir
            .canonicalize()
            .unwrap_or_else(|_| data_dir.to_path_buf());
        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .filter(|d| path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .ok_or_else(|| {
                SchedulerError::Resource(format!("no disk mounted for {}", path.display()))
            })?;

        Ok(ResourceSample {
            cpu_percent,
            memory_percent,
            disk_free_bytes: disk.available_space(),
        })
    }
}

impl ResourceSampler for SystemSampler {
    fn sample(&self) -> BoxFuture<'_, SchedulerResult<ResourceSample>> {
        let data_dir = self.data_dir.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || Self::sample_blocking(&data_dir))
                .await
                .map_err(|e| SchedulerError::Resource(e.to_string()))?
        })
    }
}

/// Sampler returning scripted values, for tests and dry runs.
#[derive(Debug)]
pub struct StaticSampler {
    next: Mutex<SchedulerResult<ResourceSample>>,
}

impl StaticSampler {
    pub fn new(sample: ResourceSample) -> Self {
        Self {
            next: Mutex::new(Ok(sample)),
        }
    }

    /// A host well inside every default threshold.
    pub fn idle() -> Self {
        Self::new(ResourceSample {
            cpu_percent: 10.0,
            memory_percent: 30.0,
            disk_free_bytes: 100 * 1024 * 1024 * 1024,
        })
    }

    pub fn set(&self, sample: ResourceSample) {
        *self.next.lock() = Ok(sample);
    }

    /// Make every following sample fail.
    pub fn fail(&self, reason: &str) {
        *self.next.lock() = Err(SchedulerError::Resource(reason.to_string()));
    }
}

impl ResourceSampler for StaticSampler {
    fn sample(&self) -> BoxFuture<'_, SchedulerResult<ResourceSample>> {
        let next = match &*self.next.lock() {
            Ok(sample) => Ok(*sample),
            Err(e) => Err(SchedulerError::Resource(e.to_string())),
        };
        Box::pin(async move { next })
    }
}

/// Decides whether the host has headroom for another job.
pub struct ResourceGate {
    thresholds: ResourceThresholds,
    sampler: Box<dyn ResourceSampler>,
    last: RwLock<Option<ResourceSnapshot>>,
}

impl ResourceGate {
    pub fn new(thresholds: ResourceThresholds, sampler: Box<dyn ResourceSampler>) -> Self {
        Self {
            thresholds,
            sampler,
            last: RwLock::new(None),
        }
    }

    pub fn thresholds(&self) -> &ResourceThresholds {
        &self.thresholds
    }

    /// Sample the host and evaluate the thresholds.
    pub async fn check(&self) -> ResourceSnapshot {
        let sampled = match tokio::time::timeout(SAMPLE_TIMEOUT, self.sampler.sample()).await {
            Ok(result) => result,
            Err(_) => Err(SchedulerError::Resource(format!(
                "sampling exceeded {SAMPLE_TIMEOUT:?}"
            ))),
        };

        let snapshot = match sampled {
            Ok(sample) => {
                Metrics::resources(
                    sample.cpu_percent,
                    sample.memory_percent,
                    sample.disk_free_bytes,
                );
                self.evaluate(sample)
            }
            Err(e) => {
                warn!(error = %e, "Resource check failed, allowing dispatch");
                ResourceSnapshot {
                    sample: None,
                    should_proceed: true,
                    warnings: Vec::new(),
                    error: Some(e.to_string()),
                    sampled_at: Utc::now(),
                }
            }
        };

        *self.last.write() = Some(snapshot.clone());
        snapshot
    }

    /// Most recent snapshot, if any check has run.
    pub fn last(&self) -> Option<ResourceSnapshot> {
        self.last.read().clone()
    }

    fn evaluate(&self, sample: ResourceSample) -> ResourceSnapshot {
        let t = &self.thresholds;
        let mut warnings = Vec::new();

        if sample.cpu_percent >= t.max_cpu_percent {
            warnings.push(format!("High CPU usage: {:.1}%", sample.cpu_percent));
        }
        if sample.memory_percent >= t.max_memory_percent {
            warnings.push(format!("High memory usage: {:.1}%", sample.memory_percent));
        }
        if sample.disk_free_bytes < t.min_disk_free_bytes {
            warnings.push(format!(
                "Low disk space: {:.1}GB",
                sample.disk_free_bytes as f64 / GIB
            ));
        }

        debug!(
            cpu_percent = sample.cpu_percent,
            memory_percent = sample.memory_percent,
            disk_free_bytes = sample.disk_free_bytes,
            "Resource sample"
        );

        ResourceSnapshot {
            sample: Some(sample),
            should_proceed: warnings.is_empty(),
            warnings,
            error: None,
            sampled_at: Utc::now(),
        }
    }
}
