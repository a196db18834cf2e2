//! HTTP status server using axum.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use kline_exchange::{CacheStats, RateLimiterStats};
use kline_ingest::IngestionEngine;
use kline_scheduler::Scheduler;
use kline_store::{CandleStore, StoreStats};
use kline_telemetry::{Metrics, StatisticsSnapshot};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::error::AppResult;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct HttpState {
    engine: Arc<IngestionEngine>,
    scheduler: Arc<Scheduler>,
    store: Arc<dyn CandleStore>,
    started_at: DateTime<Utc>,
}

impl HttpState {
    pub fn new(
        engine: Arc<IngestionEngine>,
        scheduler: Arc<Scheduler>,
        store: Arc<dyn CandleStore>,
    ) -> Self {
        Self {
            engine,
            scheduler,
            store,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    scheduler_running: bool,
    uptime_seconds: i64,
    symbols: usize,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    cycles_started: u64,
    statistics: StatisticsSnapshot,
    rate_limiter: RateLimiterStats,
    price_cache: CacheStats,
    symbol_cache: CacheStats,
    store: Option<StoreStats>,
}

/// Create the axum router.
pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<HttpState>) -> Json<HealthResponse> {
    let running = state.scheduler.is_running();
    Json(HealthResponse {
        status: if running { "ok" } else { "idle" },
        scheduler_running: running,
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        symbols: state.engine.symbols().len(),
    })
}

async fn status(State(state): State<HttpState>) -> Response {
    Json(state.scheduler.status()).into_response()
}

async fn stats(State(state): State<HttpState>) -> Json<StatsResponse> {
    let store = match state.store.stats().await {
        Ok(stats) => Some(stats),
        Err(e) => {
            warn!(error = %e, "Failed to read store stats");
            None
        }
    };

    Json(StatsResponse {
        cycles_started: state.engine.cycles_started(),
        statistics: state.engine.statistics().snapshot(),
        rate_limiter: state.engine.rate_limiter().stats(),
        price_cache: state.engine.price_cache_stats(),
        symbol_cache: state.engine.symbol_cache_stats(),
        store,
    })
}

async fn metrics() -> Response {
    match Metrics::render() {
        Ok(body) => ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Run the status server until `shutdown` is cancelled.
pub async fn run_server(state: HttpState, port: u16, shutdown: CancellationToken) -> AppResult<()> {
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Starting HTTP status server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("HTTP status server stopped");
    Ok(())
}
