//! Gap detection and backfill.
//!
//! A gap is a run of expected-but-missing candle slots. Ranges are
//! inclusive slot timestamps: a single missing slot at 120 is `[120, 120]`.

use std::time::Duration;

use kline_core::{GapRange, Timeframe};
use kline_store::{CandleStore, StoreResult};
use kline_telemetry::Metrics;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::engine::IngestionEngine;

/// Summary of one gap audit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GapReport {
    pub pairs_checked: usize,
    pub gaps_found: usize,
    /// Gaps for which at least one candle was inserted.
    pub gaps_filled: usize,
    pub records_inserted: usize,
    pub errors: Vec<String>,
}

/// Finds missing slots in stored series.
#[derive(Debug, Clone, Copy)]
pub struct GapDetector {
    lookback_secs: i64,
}

impl GapDetector {
    pub fn new(lookback: Duration) -> Self {
        Self {
            lookback_secs: lookback.as_secs() as i64,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(Duration::from_secs(config.gap_lookback_hours * 3600))
    }

    /// Missing slots of `[start, end]` given sorted stored timestamps.
    ///
    /// Timestamps outside the range or off the expected cadence never
    /// produce an inverted range.
    pub fn find_gaps(timestamps: &[i64], start: i64, end: i64, interval: i64) -> Vec<GapRange> {
        if start > end || interval <= 0 {
            return Vec::new();
        }

        let mut gaps = Vec::new();
        let mut expected = start;

        for &ts in timestamps {
            if ts < start {
                continue;
            }
            if ts > end {
                break;
            }
            if ts > expected && ts - interval >= expected {
                gaps.push(GapRange::new(expected, ts - interval));
            }
            expected = expected.max(ts + interval);
        }

        if expected <= end {
            gaps.push(GapRange::new(expected, end));
        }
        gaps
    }

    /// Gaps of one stored series over `[start, end]`.
    pub async fn detect(
        &self,
        store: &dyn CandleStore,
        symbol: &str,
        timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> StoreResult<Vec<GapRange>> {
        let timestamps = store
            .timestamps_in_range(symbol, timeframe, start, end)
            .await?;
        Ok(Self::find_gaps(
            &timestamps,
            start,
            end,
            timeframe.interval_secs(),
        ))
    }

    /// Audit window for a timeframe: from the lookback start up to the last
    /// closed slot, both aligned to the interval grid.
    pub fn audit_window(&self, timeframe: Timeframe, now: i64) -> Option<(i64, i64)> {
        let start = timeframe.align(now - self.lookback_secs);
        let end = timeframe.align(now) - timeframe.interval_secs();
        (start <= end).then_some((start, end))
    }

    /// Detect and backfill gaps for every configured pair.
    pub async fn audit(&self, engine: &IngestionEngine, now: i64) -> GapReport {
        let mut report = GapReport::default();

        for symbol in engine.symbols() {
            for &timeframe in engine.timeframes() {
                let Some((start, end)) = self.audit_window(timeframe, now) else {
                    continue;
                };
                report.pairs_checked += 1;

                let gaps = match self
                    .detect(engine.store().as_ref(), &symbol, timeframe, start, end)
                    .await
                {
                    Ok(gaps) => gaps,
                    Err(e) => {
                        warn!(%symbol, %timeframe, error = %e, "Gap detection failed");
                        report.errors.push(format!("{symbol} {timeframe}: {e}"));
                        continue;
                    }
                };
                if gaps.is_empty() {
                    continue;
                }

                debug!(%symbol, %timeframe, gaps = gaps.len(), "Gaps found");
                report.gaps_found += gaps.len();
                Metrics::gaps_found(&symbol, timeframe.as_str(), gaps.len());

                for gap in gaps {
                    match engine.backfill_gap(&symbol, timeframe, gap).await {
                        Ok(0) => {}
                        Ok(inserted) => {
                            report.gaps_filled += 1;
                            report.records_inserted += inserted;
                            Metrics::gap_filled(&symbol, timeframe.as_str());
                        }
                        Err(e) => {
                            warn!(%symbol, %timeframe, %gap, error = %e, "Backfill failed");
                            report
                                .errors
                                .push(format!("{symbol} {timeframe} {gap}: {e}"));
                        }
                    }
                }
            }
        }

        info!(
            pairs_checked = report.pairs_checked,
            gaps_found = report.gaps_found,
            gaps_filled = report.gaps_filled,
            records_inserted = report.records_inserted,
            errors = report.errors.len(),
            "Gap audit completed"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_missing_slot_and_trailing_gap() {
        let gaps = GapDetector::find_gaps(&[0, 60, 180], 0, 240, 60);
        assert_eq!(gaps, vec![GapRange::new(120, 120), GapRange::new(240, 240)]);
    }

    #[test]
    fn test_no_data_is_one_gap() {
        let gaps = GapDetector::find_gaps(&[], 0, 300, 60);
        assert_eq!(gaps, vec![GapRange::new(0, 300)]);
    }

    #[test]
    fn test_complete_series_has_no_gaps() {
        let ts: Vec<i64> = (0..=4).map(|i| i * 60).collect();
        assert!(GapDetector::find_gaps(&ts, 0, 240, 60).is_empty());
    }

    #[test]
    fn test_leading_and_multi_slot_gaps() {
        let gaps = GapDetector::find_gaps(&[180, 240, 540], 0, 540, 60);
        assert_eq!(gaps, vec![GapRange::new(0, 120), GapRange::new(300, 480)]);
    }

    #[test]
    fn test_inverted_range_is_empty() {
        assert!(GapDetector::find_gaps(&[], 300, 0, 60).is_empty());
    }

    #[test]
    fn test_out_of_range_and_duplicate_timestamps() {
        let gaps = GapDetector::find_gaps(&[-60, 0, 0, 60, 600], 0, 120, 60);
        assert_eq!(gaps, vec![GapRange::new(120, 120)]);
    }

    #[test]
    fn test_audit_window_ends_at_last_closed_slot() {
        let detector = GapDetector::new(Duration::from_secs(3600));
        let (start, end) = detector
            .audit_window(Timeframe::M5, 10 * 3600 + 130)
            .unwrap();
        assert_eq!(start, 9 * 3600);
        assert_eq!(end, 10 * 3600 - 300);
    }

    #[test]
    fn test_zero_lookback_has_no_window() {
        let detector = GapDetector::new(Duration::ZERO);
        assert!(detector.audit_window(Timeframe::H1, 7200 + 30).is_none());
    }
}
