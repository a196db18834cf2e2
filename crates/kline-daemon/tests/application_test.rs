//! Application integration tests.
//!
//! Covers:
//! - Preflight removing unlisted symbols
//! - One-shot ingestion cycle
//! - Registered jobs running through the scheduler

mod integration;
use integration::common::{build_app, seeded_exchange, test_config, BTC, ETH, UNLISTED};

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use kline_core::Timeframe;
use kline_daemon::jobs::{DAILY_CLEANUP, GAP_FILLING, REALTIME_PRICES, RESOURCE_CHECK};
use kline_daemon::AppError;
use kline_exchange::MockExchange;
use kline_scheduler::JobStatus;
use kline_store::CandleStore;

#[tokio::test]
async fn test_preflight_drops_unlisted_symbols() {
    let (app, _store) = build_app(test_config(&[BTC, UNLISTED, ETH]), seeded_exchange());

    app.run_preflight().await.unwrap();

    assert_eq!(
        app.engine().symbols(),
        vec![BTC.to_string(), ETH.to_string()]
    );
}

#[tokio::test]
async fn test_preflight_fails_without_valid_symbols() {
    let exchange = Arc::new(MockExchange::new());
    exchange.mark_invalid(UNLISTED);
    let (app, _store) = build_app(test_config(&[UNLISTED]), exchange);

    let err = app.run_preflight().await.unwrap_err();
    assert!(matches!(err, AppError::Preflight(_)));
}

#[tokio::test]
async fn test_invalid_config_rejected_at_build() {
    let mut config = test_config(&[BTC]);
    config.timeframes.clear();

    let result = kline_daemon::Application::with_components(
        config,
        seeded_exchange(),
        Arc::new(kline_store::MemoryStore::new()),
        Box::new(kline_scheduler::StaticSampler::idle()),
    );
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[tokio::test]
async fn test_run_once_collects_candles_and_prices() {
    let (app, store) = build_app(test_config(&[BTC, ETH]), seeded_exchange());

    let cycle = app.run_once().await;

    assert_eq!(cycle.pairs.len(), 2);
    assert!(cycle.pairs.iter().all(|p| p.is_success()));
    assert_eq!(cycle.prices.updated, 2);
    assert_eq!(cycle.total_errors, 0);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.candle_rows, 40);
    assert!(store.latest_timestamp(BTC, Timeframe::M1).await.unwrap().is_some());
}

#[tokio::test]
async fn test_registered_jobs_run_through_scheduler() {
    let (app, store) = build_app(test_config(&[BTC]), seeded_exchange());
    app.register_jobs().unwrap();

    let scheduler = app.scheduler();
    let dispatched = scheduler.tick(Utc::now() + ChronoDuration::days(2)).await;
    assert_eq!(dispatched, 5);
    scheduler.wait_idle().await;

    let history = scheduler.history();
    assert_eq!(history.len(), 5);
    for name in ["ohlcv_1m", GAP_FILLING, REALTIME_PRICES, RESOURCE_CHECK, DAILY_CLEANUP] {
        let execution = history
            .iter()
            .find(|e| e.job_name == name)
            .unwrap_or_else(|| panic!("no execution for {name}"));
        assert_eq!(execution.status, JobStatus::Completed, "{name}");
    }

    // Recent candles survive the retention cleanup.
    assert_eq!(store.stats().await.unwrap().candle_rows, 20);
}

#[tokio::test]
async fn test_one_candle_job_per_timeframe() {
    let mut config = test_config(&[BTC]);
    config.timeframes = vec![Timeframe::M1, Timeframe::M15, Timeframe::H1];
    let (app, _store) = build_app(config, seeded_exchange());
    app.register_jobs().unwrap();

    let status = app.scheduler().status();
    let mut names: Vec<&str> = status.jobs.iter().map(|j| j.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(
        names,
        vec![
            DAILY_CLEANUP,
            GAP_FILLING,
            "ohlcv_15m",
            "ohlcv_1h",
            "ohlcv_1m",
            REALTIME_PRICES,
            RESOURCE_CHECK,
        ]
    );
}

#[tokio::test]
async fn test_registering_twice_is_rejected() {
    let (app, _store) = build_app(test_config(&[BTC]), seeded_exchange());
    app.register_jobs().unwrap();

    let err = app.register_jobs().unwrap_err();
    assert!(matches!(err, AppError::Scheduler(_)));
}

#[tokio::test]
async fn test_config_file_builds_memory_backed_app() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("collector.toml");
    std::fs::write(
        &path,
        r#"
        symbols = ["btc/usdt"]
        timeframes = ["1m"]

        [rate_limit]
        max_calls_per_second = 1000
        burst_protection = false

        [storage]
        backend = "memory"
        "#,
    )
    .unwrap();

    let config = kline_daemon::AppConfig::from_file(path.to_str().unwrap()).unwrap();
    let (app, _store) = build_app(config, seeded_exchange());
    app.run_preflight().await.unwrap();

    assert_eq!(app.engine().symbols(), vec![BTC.to_string()]);
    assert_eq!(app.engine().timeframes().to_vec(), vec![Timeframe::M1]);
}
