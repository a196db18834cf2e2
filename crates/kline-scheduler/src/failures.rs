//! Per-job consecutive failure counters.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

/// Consecutive failure counts keyed by job name.
///
/// Cheap to clone; clones share the same counters, so maintenance jobs can
/// reset them while the scheduler runs.
#[derive(Debug, Clone, Default)]
pub struct FailureTracker {
    counts: Arc<Mutex<HashMap<String, u32>>>,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, job: &str) -> u32 {
        self.counts.lock().get(job).copied().unwrap_or(0)
    }

    /// Returns the new count.
    pub fn record_failure(&self, job: &str) -> u32 {
        let mut counts = self.counts.lock();
        let count = counts.entry(job.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn record_success(&self, job: &str) {
        self.counts.lock().insert(job.to_string(), 0);
    }

    pub fn reset(&self, job: &str) {
        self.counts.lock().remove(job);
    }

    pub fn reset_all(&self) {
        self.counts.lock().clear();
    }

    pub fn snapshot(&self) -> BTreeMap<String, u32> {
        self.counts
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}
