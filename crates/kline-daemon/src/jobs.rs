//! Recurring collector jobs.
//!
//! Each configured timeframe gets its own candle job. A candle job fails only
//! when every symbol failed, and a price job only when every symbol failed.
//! Partial failure completes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveTime, Utc};
use kline_core::Timeframe;
use kline_ingest::IngestionEngine;
use kline_scheduler::{
    job_fn, Cadence, FailureTracker, JobSpec, ResourceGate, SchedulerError, SchedulerResult,
};
use kline_store::CandleStore;
use tracing::{debug, info, warn};

pub const REALTIME_PRICES: &str = "realtime_prices";
pub const GAP_FILLING: &str = "gap_filling";
pub const RESOURCE_CHECK: &str = "resource_check";
pub const DAILY_CLEANUP: &str = "daily_cleanup";

const SECS_PER_DAY: i64 = 86_400;

/// Job name for a timeframe's candle collection, e.g. `ohlcv_5m`.
pub fn ohlcv_job_name(timeframe: Timeframe) -> String {
    format!("ohlcv_{}", timeframe.as_str())
}

fn frequency_tag(timeframe: Timeframe) -> &'static str {
    match timeframe.interval_secs() {
        0..=60 => "high_frequency",
        61..=300 => "medium_frequency",
        301..=3_599 => "low_frequency",
        _ => "hourly",
    }
}

/// Candle collection for one timeframe across every symbol.
///
/// Runs once per candle interval, never more often than `min_interval`.
pub fn ohlcv_job(
    engine: Arc<IngestionEngine>,
    timeframe: Timeframe,
    min_interval: Duration,
) -> JobSpec {
    let interval = Duration::from_secs(timeframe.interval_secs().max(0) as u64).max(min_interval);
    JobSpec::new(
        ohlcv_job_name(timeframe),
        Cadence::Every(interval),
        job_fn(move || {
            let engine = Arc::clone(&engine);
            async move {
                let pairs = engine.collect_timeframes(&[timeframe]).await;
                if !pairs.is_empty() && pairs.iter().all(|p| !p.is_success()) {
                    return Err(SchedulerError::Job(format!(
                        "all {} {timeframe} pairs failed",
                        pairs.len()
                    )));
                }
                let inserted: usize = pairs.iter().map(|p| p.inserted).sum();
                debug!(%timeframe, pairs = pairs.len(), inserted, "Candle job finished");
                Ok(())
            }
        }),
    )
    .with_tags(&["ohlcv", frequency_tag(timeframe)])
}

/// Hourly gap audit and backfill over every configured pair.
pub fn gap_filling_job(engine: Arc<IngestionEngine>, minute: u32) -> JobSpec {
    JobSpec::new(
        GAP_FILLING,
        Cadence::HourlyAt { minute },
        job_fn(move || {
            let engine = Arc::clone(&engine);
            async move {
                let report = engine.audit_gaps().await;
                if !report.errors.is_empty() && report.gaps_filled == 0 {
                    return Err(SchedulerError::Job(format!(
                        "gap audit failed: {}",
                        report.errors.join("; ")
                    )));
                }
                Ok(())
            }
        }),
    )
    .with_tags(&["maintenance", "gap_filling"])
}

/// Live price batch.
pub fn price_job(engine: Arc<IngestionEngine>, interval: Duration) -> JobSpec {
    JobSpec::new(
        REALTIME_PRICES,
        Cadence::Every(interval),
        job_fn(move || {
            let engine = Arc::clone(&engine);
            async move {
                let prices = engine.collect_prices().await;
                if prices.all_failed() {
                    return Err(SchedulerError::Job(format!(
                        "all {} price requests failed",
                        prices.requested
                    )));
                }
                Ok(())
            }
        }),
    )
    .with_tags(&["realtime", "high_frequency"])
}

/// Sample the host and log warnings.
pub fn resource_check_job(gate: Arc<ResourceGate>, interval: Duration) -> JobSpec {
    JobSpec::new(
        RESOURCE_CHECK,
        Cadence::Every(interval),
        job_fn(move || {
            let gate = Arc::clone(&gate);
            async move {
                let snapshot = gate.check().await;
                if !snapshot.warnings.is_empty() {
                    warn!(warnings = ?snapshot.warnings, "Resource warnings");
                } else if let Some(sample) = snapshot.sample {
                    debug!(
                        cpu_percent = sample.cpu_percent,
                        memory_percent = sample.memory_percent,
                        disk_free_bytes = sample.disk_free_bytes,
                        "Resource check"
                    );
                }
                Ok(())
            }
        }),
    )
    .with_tags(&["monitoring", "resources"])
}

/// Delete rows past retention, purge expired cache entries and reset
/// failure counters.
pub fn daily_cleanup_job(
    engine: Arc<IngestionEngine>,
    failures: FailureTracker,
    retention_days: u32,
    at: NaiveTime,
) -> JobSpec {
    JobSpec::new(
        DAILY_CLEANUP,
        Cadence::DailyAt(at),
        job_fn(move || {
            let engine = Arc::clone(&engine);
            let failures = failures.clone();
            async move {
                run_cleanup(engine.store().as_ref(), &failures, retention_days).await?;
                let purged = engine.purge_expired_caches();
                debug!(purged, "Expired cache entries purged");
                Ok(())
            }
        }),
    )
    .with_tags(&["maintenance", "daily"])
}

pub(crate) async fn run_cleanup(
    store: &dyn CandleStore,
    failures: &FailureTracker,
    retention_days: u32,
) -> SchedulerResult<()> {
    let cutoff = Utc::now().timestamp() - i64::from(retention_days) * SECS_PER_DAY;
    let report = store
        .delete_older_than(cutoff)
        .await
        .map_err(SchedulerError::job)?;

    failures.reset_all();
    info!(
        cutoff,
        candles_deleted = report.candles_deleted,
        prices_deleted = report.prices_deleted,
        "Daily cleanup completed"
    );
    Ok(())
}
