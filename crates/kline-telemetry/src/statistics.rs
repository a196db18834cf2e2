//! Collection statistics.
//!
//! Thread-safe counters for requests, inserted records and cycle
//! durations. All mutations are O(1) and take one short lock; the
//! Prometheus counters are bumped alongside.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::metrics::Metrics;

/// Number of recent cycle durations kept for the average.
const CYCLE_WINDOW: usize = 100;

/// Per-symbol request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SymbolStats {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub records: u64,
}

/// Point-in-time copy of the statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StatisticsSnapshot {
    pub runtime_seconds: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate_percent: f64,
    pub total_records_inserted: u64,
    pub requests_per_minute: f64,
    pub records_per_minute: f64,
    pub last_collection_time: Option<DateTime<Utc>>,
    pub completed_cycles: u64,
    pub average_cycle_seconds: f64,
    pub errors_by_kind: BTreeMap<String, u64>,
    pub symbol_statistics: BTreeMap<String, SymbolStats>,
}

struct Inner {
    started: Instant,
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    total_records: u64,
    last_collection_time: Option<DateTime<Utc>>,
    completed_cycles: u64,
    cycle_times: VecDeque<Duration>,
    errors_by_kind: BTreeMap<String, u64>,
    symbols: BTreeMap<String, SymbolStats>,
}

impl Inner {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            total_records: 0,
            last_collection_time: None,
            completed_cycles: 0,
            cycle_times: VecDeque::with_capacity(CYCLE_WINDOW),
            errors_by_kind: BTreeMap::new(),
            symbols: BTreeMap::new(),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Shared collection counters.
pub struct Statistics {
    inner: Mutex<Inner>,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Record one exchange request.
    ///
    /// `kind` is the request kind (`ohlcv`, `ticker`, ...). Records only
    /// count toward totals on success; `error_kind` only on failure.
    pub fn record_request(
        &self,
        success: bool,
        symbol: &str,
        kind: &str,
        records: usize,
        error_kind: Option<&str>,
    ) {
        {
            let mut inner = self.inner.lock();
            inner.total_requests += 1;

            let records = records as u64;
            if success {
                inner.successful_requests += 1;
                inner.total_records += records;
            } else {
                inner.failed_requests += 1;
                if let Some(kind) = error_kind {
                    *inner.errors_by_kind.entry(kind.to_string()).or_default() += 1;
                }
            }

            let entry = inner.symbols.entry(symbol.to_string()).or_default();
            entry.requests += 1;
            if success {
                entry.successes += 1;
                entry.records += records;
            } else {
                entry.failures += 1;
            }
        }

        Metrics::request(kind, success);
        if let (false, Some(error_kind)) = (success, error_kind) {
            Metrics::error(error_kind);
        }
    }

    /// Record a finished collection cycle.
    pub fn record_cycle(&self, duration: Duration) {
        {
            let mut inner = self.inner.lock();
            inner.last_collection_time = Some(Utc::now());
            inner.completed_cycles += 1;
            if inner.cycle_times.len() == CYCLE_WINDOW {
                inner.cycle_times.pop_front();
            }
            inner.cycle_times.push_back(duration);
        }
        Metrics::cycle_completed(duration.as_secs_f64());
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let inner = self.inner.lock();

        let runtime = inner.started.elapsed().as_secs_f64();
        let per_minute = |count: u64| round2(count as f64 / runtime.max(1.0) * 60.0);
        let success_rate = inner.successful_requests as f64 / inner.total_requests.max(1) as f64;
        let average_cycle = if inner.cycle_times.is_empty() {
            0.0
        } else {
            inner
                .cycle_times
                .iter()
                .map(Duration::as_secs_f64)
                .sum::<f64>()
                / inner.cycle_times.len() as f64
        };

        StatisticsSnapshot {
            runtime_seconds: runtime,
            total_requests: inner.total_requests,
            successful_requests: inner.successful_requests,
            failed_requests: inner.failed_requests,
            success_rate_percent: round2(success_rate * 100.0),
            total_records_inserted: inner.total_records,
            requests_per_minute: per_minute(inner.total_requests),
            records_per_minute: per_minute(inner.total_records),
            last_collection_time: inner.last_collection_time,
            completed_cycles: inner.completed_cycles,
            average_cycle_seconds: round2(average_cycle),
            errors_by_kind: inner.errors_by_kind.clone(),
            symbol_statistics: inner.symbols.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_request_totals() {
        let stats = Statistics::new();
        stats.record_request(true, "BTC/USDT", "ohlcv", 100, None);
        stats.record_request(false, "BTC/USDT", "ohlcv", 0, Some("timeout"));
        stats.record_request(false, "ETH/USDT", "ticker", 5, Some("timeout"));

        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 3);
        assert_eq!(snap.successful_requests, 1);
        assert_eq!(snap.failed_requests, 2);
        assert_eq!(snap.total_records_inserted, 100);
        assert_eq!(snap.errors_by_kind.get("timeout"), Some(&2));
        assert_eq!(snap.success_rate_percent, 33.33);

        let btc = snap.symbol_statistics["BTC/USDT"];
        assert_eq!(btc.requests, 2);
        assert_eq!(btc.successes, 1);
        assert_eq!(btc.failures, 1);
        assert_eq!(btc.records, 100);
        assert_eq!(snap.symbol_statistics["ETH/USDT"].records, 0);
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = Statistics::new().snapshot();
        assert_eq!(snap.success_rate_percent, 0.0);
        assert_eq!(snap.average_cycle_seconds, 0.0);
        assert!(snap.last_collection_time.is_none());
    }

    #[test]
    fn test_cycle_window_keeps_last_hundred() {
        let stats = Statistics::new();
        for _ in 0..50 {
            stats.record_cycle(Duration::from_secs(10));
        }
        for _ in 0..100 {
            stats.record_cycle(Duration::from_secs(2));
        }
        let snap = stats.snapshot();
        assert_eq!(snap.completed_cycles, 150);
        assert_eq!(snap.average_cycle_seconds, 2.0);
        assert!(snap.last_collection_time.is_some());
    }

    #[test]
    fn test_concurrent_updates() {
        let stats = Arc::new(Statistics::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        stats.record_request(i % 2 == 0, "BTC/USDT", "ohlcv", 1, Some("network"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 2_000);
        assert_eq!(snap.successful_requests + snap.failed_requests, 2_000);
        assert_eq!(snap.total_records_inserted, 1_000);
    }
}
