//! Main application orchestration.
//!
//! Builds every component from `AppConfig` and owns their lifecycle:
//! - Exchange client behind a shared rate limiter
//! - Candle store
//! - Ingestion engine
//! - Scheduler with the collector jobs
//! - HTTP status server

use std::sync::Arc;

use kline_exchange::{ExchangeClient, RateLimiter, RestExchangeClient};
use kline_ingest::{CycleResult, IngestionEngine};
use kline_scheduler::{ResourceGate, ResourceSampler, Scheduler, SystemSampler};
use kline_store::{CandleStore, JsonlStore, MemoryStore};
use kline_telemetry::Statistics;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{AppConfig, StorageBackend};
use crate::error::{AppError, AppResult};
use crate::http::{self, HttpState};
use crate::jobs;

/// Main application.
pub struct Application {
    config: AppConfig,
    exchange: Arc<dyn ExchangeClient>,
    store: Arc<dyn CandleStore>,
    engine: Arc<IngestionEngine>,
    scheduler: Arc<Scheduler>,
}

impl Application {
    /// Build the application against the configured exchange and store.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let exchange: Arc<dyn ExchangeClient> =
            Arc::new(RestExchangeClient::new(&config.exchange)?);

        let store: Arc<dyn CandleStore> = match config.storage.backend {
            StorageBackend::Jsonl => Arc::new(JsonlStore::open(&config.storage.data_dir)?),
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
        };

        let sampler = Box::new(SystemSampler::new(&config.storage.data_dir));
        Self::with_components(config, exchange, store, sampler)
    }

    /// Build the application with explicit collaborators.
    pub fn with_components(
        config: AppConfig,
        exchange: Arc<dyn ExchangeClient>,
        store: Arc<dyn CandleStore>,
        sampler: Box<dyn ResourceSampler>,
    ) -> AppResult<Self> {
        config.validate()?;

        let engine = Arc::new(
            IngestionEngine::new(config.ingest.clone(), Arc::clone(&exchange), Arc::clone(&store))
                .with_universe(config.normalized_symbols()?, config.timeframes.clone())
                .with_rate_limiter(Arc::new(RateLimiter::new(config.rate_limit.clone())))
                .with_statistics(Arc::new(Statistics::new()))
                .with_cache_config(&config.cache),
        );

        let gate = Arc::new(ResourceGate::new(config.resources.clone(), sampler));
        let scheduler = Arc::new(Scheduler::new(config.scheduler.core.clone(), gate));

        Ok(Self {
            config,
            exchange,
            store,
            engine,
            scheduler,
        })
    }

    pub fn engine(&self) -> &Arc<IngestionEngine> {
        &self.engine
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn http_state(&self) -> HttpState {
        HttpState::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.scheduler),
            Arc::clone(&self.store),
        )
    }

    /// Check exchange connectivity and drop symbols the exchange does not list.
    pub async fn run_preflight(&self) -> AppResult<()> {
        info!(exchange = self.exchange.name(), "Running preflight checks");

        self.exchange
            .ping()
            .await
            .map_err(|e| AppError::Preflight(format!("Exchange unreachable: {e}")))?;

        let removed = self.engine.retain_valid_symbols().await;
        if !removed.is_empty() {
            warn!(removed = ?removed, "Dropped unlisted symbols");
        }

        let symbols = self.engine.symbols();
        if symbols.is_empty() {
            return Err(AppError::Preflight("no valid symbols configured".into()));
        }

        info!(
            symbols = ?symbols,
            timeframes = ?self.engine.timeframes(),
            "Preflight complete"
        );
        Ok(())
    }

    /// Register the collector jobs with the scheduler.
    pub fn register_jobs(&self) -> AppResult<()> {
        let schedule = &self.config.scheduler;

        for &timeframe in self.engine.timeframes() {
            self.scheduler.register(jobs::ohlcv_job(
                Arc::clone(&self.engine),
                timeframe,
                schedule.collection_interval(),
            ))?;
        }
        self.scheduler.register(jobs::gap_filling_job(
            Arc::clone(&self.engine),
            schedule.gap_fill_minute,
        ))?;
        self.scheduler.register(jobs::price_job(
            Arc::clone(&self.engine),
            schedule.price_interval(),
        ))?;
        self.scheduler.register(jobs::resource_check_job(
            Arc::clone(self.scheduler.gate()),
            schedule.resource_check_interval(),
        ))?;
        self.scheduler.register(jobs::daily_cleanup_job(
            Arc::clone(&self.engine),
            self.scheduler.failures(),
            self.config.storage.retention_days,
            schedule.cleanup_time()?,
        ))?;

        Ok(())
    }

    /// One ingestion cycle outside the scheduler.
    pub async fn run_once(&self) -> CycleResult {
        self.engine.run_once().await
    }

    /// Run until Ctrl+C.
    pub async fn run(&self) -> AppResult<()> {
        self.register_jobs()?;
        self.scheduler.start()?;

        let shutdown = CancellationToken::new();
        let server = if self.config.telemetry.http_enabled {
            let state = self.http_state();
            let port = self.config.telemetry.http_port;
            let token = shutdown.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = http::run_server(state, port, token).await {
                    error!(error = %e, "HTTP status server failed");
                }
            }))
        } else {
            None
        };

        info!("Collector running, press Ctrl+C to stop");
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");

        shutdown.cancel();
        self.scheduler.stop().await?;
        if let Some(server) = server {
            if let Err(e) = server.await {
                warn!(error = %e, "HTTP server task ended abnormally");
            }
        }

        let snapshot = self.engine.statistics().snapshot();
        info!(
            total_requests = snapshot.total_requests,
            total_records = snapshot.total_records_inserted,
            success_rate_percent = snapshot.success_rate_percent,
            "Collector stopped"
        );
        Ok(())
    }
}
