//! Prometheus metrics for the kline collector.
//!
//! Covers:
//! - Exchange requests by kind and outcome
//! - Rows inserted and candles rejected
//! - Rate limiter waits
//! - Collection cycle duration
//! - Gap detection and backfill
//! - Scheduler job outcomes
//! - Host resource gauges
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration
//! failure means duplicate metric names, a programming error that should
//! crash at startup. These panics only occur during static
//! initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
    register_histogram_vec, register_int_gauge, CounterVec, Encoder, Gauge, GaugeVec, Histogram,
    HistogramVec, IntGauge, TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

/// Exchange requests.
/// Labels: kind (ohlcv/ticker/ticker_batch), outcome (success/failure)
pub static REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "kline_requests_total",
        "Exchange requests by kind and outcome",
        &["kind", "outcome"]
    )
    .unwrap()
});

/// Request failures by error kind.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "kline_errors_total",
        "Request failures by error kind",
        &["error_kind"]
    )
    .unwrap()
});

/// Rows written to the store.
/// Labels: table (candles/prices)
pub static RECORDS_INSERTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "kline_records_inserted_total",
        "Rows inserted into the store",
        &["table", "symbol"]
    )
    .unwrap()
});

/// Candles dropped by validation.
pub static CANDLES_REJECTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "kline_candles_rejected_total",
        "Candles dropped by validation",
        &["symbol", "reason"]
    )
    .unwrap()
});

/// Time spent waiting in the rate limiter.
pub static RATE_LIMIT_WAIT_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "kline_rate_limit_wait_seconds",
        "Time spent waiting for a rate limiter slot",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]
    )
    .unwrap()
});

/// Collection cycle duration.
pub static CYCLE_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "kline_cycle_duration_seconds",
        "Duration of a full collection cycle",
        vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0]
    )
    .unwrap()
});

/// Gaps found by the detector.
pub static GAPS_FOUND_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "kline_gaps_found_total",
        "Missing candle ranges found",
        &["symbol", "timeframe"]
    )
    .unwrap()
});

/// Gaps for which backfill inserted at least one row.
pub static GAPS_FILLED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "kline_gaps_filled_total",
        "Missing candle ranges backfilled",
        &["symbol", "timeframe"]
    )
    .unwrap()
});

/// Scheduler job executions.
/// Labels: job, status (completed/failed/skipped)
pub static JOB_EXECUTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "kline_job_executions_total",
        "Scheduler job executions by final status",
        &["job", "status"]
    )
    .unwrap()
});

/// Job run time.
pub static JOB_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "kline_job_duration_seconds",
        "Scheduler job run time",
        &["job"],
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]
    )
    .unwrap()
});

/// Consecutive failures per job.
pub static JOB_CONSECUTIVE_FAILURES: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "kline_job_consecutive_failures",
        "Consecutive failures per scheduler job",
        &["job"]
    )
    .unwrap()
});

/// Jobs currently running.
pub static JOBS_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("kline_jobs_running", "Scheduler jobs currently running").unwrap()
});

/// Host CPU usage percent.
pub static CPU_PERCENT: Lazy<Gauge> =
    Lazy::new(|| register_gauge!("kline_cpu_percent", "Host CPU usage percent").unwrap());

/// Host memory usage percent.
pub static MEMORY_PERCENT: Lazy<Gauge> =
    Lazy::new(|| register_gauge!("kline_memory_percent", "Host memory usage percent").unwrap());

/// Free space on the data disk in bytes.
pub static DISK_FREE_BYTES: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("kline_disk_free_bytes", "Free space on the data disk").unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Record an exchange request outcome.
    pub fn request(kind: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        REQUESTS_TOTAL.with_label_values(&[kind, outcome]).inc();
    }

    pub fn error(error_kind: &str) {
        ERRORS_TOTAL.with_label_values(&[error_kind]).inc();
    }

    pub fn records_inserted(table: &str, symbol: &str, count: usize) {
        if count > 0 {
            RECORDS_INSERTED_TOTAL
                .with_label_values(&[table, symbol])
                .inc_by(count as f64);
        }
    }

    pub fn candles_rejected(symbol: &str, reason: &str, count: usize) {
        if count > 0 {
            CANDLES_REJECTED_TOTAL
                .with_label_values(&[symbol, reason])
                .inc_by(count as f64);
        }
    }

    pub fn rate_limit_wait(seconds: f64) {
        RATE_LIMIT_WAIT_SECONDS.observe(seconds);
    }

    pub fn cycle_completed(seconds: f64) {
        CYCLE_DURATION_SECONDS.observe(seconds);
    }

    pub fn gaps_found(symbol: &str, timeframe: &str, count: usize) {
        if count > 0 {
            GAPS_FOUND_TOTAL
                .with_label_values(&[symbol, timeframe])
                .inc_by(count as f64);
        }
    }

    pub fn gap_filled(symbol: &str, timeframe: &str) {
        GAPS_FILLED_TOTAL.with_label_values(&[symbol, timeframe]).inc();
    }

    /// Record a job reaching a final status.
    pub fn job_finished(job: &str, status: &str, duration_secs: Option<f64>) {
        JOB_EXECUTIONS_TOTAL.with_label_values(&[job, status]).inc();
        if let Some(secs) = duration_secs {
            JOB_DURATION_SECONDS.with_label_values(&[job]).observe(secs);
        }
    }

    pub fn job_failures(job: &str, consecutive: u32) {
        JOB_CONSECUTIVE_FAILURES
            .with_label_values(&[job])
            .set(consecutive as f64);
    }

    pub fn job_started() {
        JOBS_RUNNING.inc();
    }

    pub fn job_ended() {
        JOBS_RUNNING.dec();
    }

    pub fn resources(cpu_percent: f64, memory_percent: f64, disk_free_bytes: u64) {
        CPU_PERCENT.set(cpu_percent);
        MEMORY_PERCENT.set(memory_percent);
        DISK_FREE_BYTES.set(disk_free_bytes as f64);
    }

    /// Render all registered metrics in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buf)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_metrics() {
        Metrics::request("ohlcv", true);
        Metrics::job_finished("ohlcv_1m", "completed", Some(1.5));
        Metrics::resources(12.0, 40.0, 1 << 30);

        let text = Metrics::render().unwrap();
        assert!(text.contains("kline_requests_total"));
        assert!(text.contains("kline_job_executions_total"));
        assert!(text.contains("kline_disk_free_bytes"));
    }
}
