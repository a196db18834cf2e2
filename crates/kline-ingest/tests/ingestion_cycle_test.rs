//! Ingestion cycle integration tests.
//!
//! Covers:
//! - First collection and incremental follow-up
//! - Deduplication across cycles
//! - Gap audit and backfill
//! - Persistence through the JSON Lines store

mod integration;
use integration::common::{build_engine, series, test_config, tick, BTC, ETH};

use std::sync::Arc;

use kline_core::{ManualClock, Timeframe};
use kline_exchange::{ExchangeError, MockExchange};
use kline_ingest::IngestConfig;
use kline_store::{CandleStore, JsonlStore, MemoryStore};

#[tokio::test]
async fn test_first_cycle_stores_initial_history() {
    let exchange = Arc::new(MockExchange::new());
    let candles = series(0, 100, 60);
    exchange.push_candles(BTC, Timeframe::M1, &candles);
    exchange.set_price(tick(BTC, 50_000.0, 6_000));

    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(6_000));
    let engine = build_engine(
        test_config(),
        exchange,
        store.clone(),
        &[BTC],
        vec![Timeframe::M1],
        clock,
    );

    let cycle = engine.run_once().await;

    assert_eq!(cycle.pairs.len(), 1);
    assert_eq!(cycle.pairs[0].inserted, 100);
    assert_eq!(cycle.prices.updated, 1);

    let snap = engine.statistics().snapshot();
    assert_eq!(snap.total_records_inserted, 101);
    assert_eq!(snap.successful_requests, 2);

    let latest = store.latest_timestamp(BTC, Timeframe::M1).await.unwrap();
    assert_eq!(latest, Some(99 * 60));
}

#[tokio::test]
async fn test_cycle_without_ticker_counts_only_candles() {
    let exchange = Arc::new(MockExchange::new());
    exchange.push_candles(BTC, Timeframe::M1, &series(0, 100, 60));

    let store = Arc::new(MemoryStore::new());
    let engine = build_engine(
        test_config(),
        exchange,
        store.clone(),
        &[BTC],
        vec![Timeframe::M1],
        Arc::new(ManualClock::new(6_000)),
    );

    let cycle = engine.run_once().await;

    assert_eq!(cycle.pairs[0].inserted, 100);
    assert_eq!(cycle.prices.updated, 0);
    assert_eq!(cycle.total_records, 100);

    let snap = engine.statistics().snapshot();
    assert_eq!(snap.total_records_inserted, 100);

    let latest = store.latest_timestamp(BTC, Timeframe::M1).await.unwrap();
    assert_eq!(latest, Some(99 * 60));
    assert_eq!(store.stats().await.unwrap().candle_rows, 100);
}

#[tokio::test]
async fn test_second_cycle_only_inserts_new_candles() {
    let exchange = Arc::new(MockExchange::new());
    exchange.push_candles(BTC, Timeframe::M1, &series(0, 10, 60));

    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(600));
    let engine = build_engine(
        test_config(),
        exchange.clone(),
        store.clone(),
        &[BTC],
        vec![Timeframe::M1],
        clock.clone(),
    );

    let first = engine.collect_all_ohlcv().await;
    assert_eq!(first[0].inserted, 10);

    // Nothing new upstream yet.
    let idle = engine.collect_all_ohlcv().await;
    assert_eq!(idle[0].inserted, 0);
    assert!(idle[0].is_success());

    exchange.push_candles(BTC, Timeframe::M1, &series(600, 5, 60));
    clock.advance(300);

    let next = engine.collect_all_ohlcv().await;
    assert_eq!(next[0].inserted, 5);
    assert_eq!(next[0].latest_timestamp, Some(14 * 60));

    let requests = exchange.candle_requests();
    assert_eq!(requests.last().unwrap().since, Some(600));
    assert_eq!(store.stats().await.unwrap().candle_rows, 15);
}

#[tokio::test]
async fn test_one_failing_symbol_does_not_block_others() {
    let exchange = Arc::new(MockExchange::new());
    exchange.push_candles(ETH, Timeframe::M1, &series(0, 5, 60));
    exchange.push_candles(ETH, Timeframe::M5, &series(0, 5, 300));
    exchange.mark_invalid("FOO/USDT");

    let store = Arc::new(MemoryStore::new());
    let engine = build_engine(
        test_config(),
        exchange,
        store,
        &["FOO/USDT", ETH],
        vec![Timeframe::M1, Timeframe::M5],
        Arc::new(ManualClock::new(1_500)),
    );

    let results = engine.collect_all_ohlcv().await;
    assert_eq!(results.len(), 4);

    let (ok, failed): (Vec<_>, Vec<_>) = results.iter().partition(|r| r.is_success());
    assert_eq!(ok.len(), 2);
    assert!(ok.iter().all(|r| r.symbol == ETH && r.inserted == 5));
    assert!(failed
        .iter()
        .all(|r| r.symbol == "FOO/USDT" && r.error_kind == Some("invalid_symbol")));
}

#[tokio::test]
async fn test_rate_limited_call_recovers() {
    let exchange = Arc::new(MockExchange::new());
    exchange.push_candles(BTC, Timeframe::M1, &series(0, 3, 60));
    exchange.fail_next(BTC, ExchangeError::RateLimited("429".into()), 1);

    let engine = build_engine(
        test_config(),
        exchange.clone(),
        Arc::new(MemoryStore::new()),
        &[BTC],
        vec![Timeframe::M1],
        Arc::new(ManualClock::new(180)),
    );

    let results = engine.collect_all_ohlcv().await;
    assert!(results[0].is_success());
    assert_eq!(results[0].inserted, 3);
    assert_eq!(exchange.candle_requests().len(), 2);
}

#[tokio::test]
async fn test_gap_audit_backfills_missing_slots() {
    // Upstream has a full hour; the store is missing two runs of slots.
    let exchange = Arc::new(MockExchange::new());
    let full = series(0, 60, 60);
    exchange.push_candles(BTC, Timeframe::M1, &full);

    let store = Arc::new(MemoryStore::new());
    let stored: Vec<_> = full
        .iter()
        .copied()
        .filter(|c| !(600..=780).contains(&c.timestamp) && c.timestamp != 1_800)
        .collect();
    store
        .upsert_candles(BTC, Timeframe::M1, &stored)
        .await
        .unwrap();

    let config = IngestConfig {
        gap_lookback_hours: 1,
        ..test_config()
    };
    let engine = build_engine(
        config,
        exchange,
        store.clone(),
        &[BTC],
        vec![Timeframe::M1],
        Arc::new(ManualClock::new(3_600)),
    );

    let report = engine.audit_gaps().await;
    assert_eq!(report.pairs_checked, 1);
    assert_eq!(report.gaps_found, 2);
    assert_eq!(report.gaps_filled, 2);
    assert_eq!(report.records_inserted, 5);
    assert!(report.errors.is_empty());

    let timestamps = store
        .timestamps_in_range(BTC, Timeframe::M1, 0, 3_540)
        .await
        .unwrap();
    assert_eq!(timestamps.len(), 60);

    // A second audit finds nothing.
    let again = engine.audit_gaps().await;
    assert_eq!(again.gaps_found, 0);
}

#[tokio::test]
async fn test_gap_audit_runs_every_nth_cycle() {
    let exchange = Arc::new(MockExchange::new());
    let config = IngestConfig {
        gap_audit_every_n_cycles: 2,
        ..test_config()
    };
    let engine = build_engine(
        config,
        exchange,
        Arc::new(MemoryStore::new()),
        &[BTC],
        vec![Timeframe::M1],
        Arc::new(ManualClock::new(3_600)),
    );

    assert!(engine.run_once().await.gaps.is_none());
    assert!(engine.run_once().await.gaps.is_some());
    assert!(engine.run_once().await.gaps.is_none());
}

#[tokio::test]
async fn test_jsonl_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let exchange = Arc::new(MockExchange::new());
    exchange.push_candles(BTC, Timeframe::M5, &series(0, 12, 300));

    {
        let store = Arc::new(JsonlStore::open(dir.path()).unwrap());
        let engine = build_engine(
            test_config(),
            exchange.clone(),
            store,
            &[BTC],
            vec![Timeframe::M5],
            Arc::new(ManualClock::new(3_600)),
        );
        let results = engine.collect_all_ohlcv().await;
        assert_eq!(results[0].inserted, 12);
    }

    let store = Arc::new(JsonlStore::open(dir.path()).unwrap());
    assert_eq!(
        store.latest_timestamp(BTC, Timeframe::M5).await.unwrap(),
        Some(11 * 300)
    );

    let engine = build_engine(
        test_config(),
        exchange.clone(),
        store,
        &[BTC],
        vec![Timeframe::M5],
        Arc::new(ManualClock::new(3_600)),
    );
    let results = engine.collect_all_ohlcv().await;
    assert_eq!(results[0].inserted, 0);
    assert_eq!(exchange.candle_requests().last().unwrap().since, Some(3_600));
}
