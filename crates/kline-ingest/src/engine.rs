//! Ingestion engine.
//!
//! Fetches candles for every configured (symbol, timeframe) pair over a
//! bounded worker pool, validates them, drops rows already stored and
//! persists the rest. Live prices are fetched in one batch per cycle with a
//! per-symbol fallback.
//!
//! Every exchange call passes through the shared `RateLimiter`. Transient
//! errors are retried with linear backoff; an invalid symbol is skipped for
//! the rest of the cycle.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use kline_core::{
    BoxFuture, CandleValidator, Clock, GapRange, PriceTick, RawCandle, SystemClock, Timeframe,
    ValidationMode,
};
use kline_exchange::{
    CacheStats, ExchangeClient, ExchangeError, ExchangeResult, RateLimiter, RateLimiterConfig,
    TtlCache,
};
use kline_store::CandleStore;
use kline_telemetry::{Metrics, Statistics};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{CacheConfig, IngestConfig};
use crate::error::{IngestError, IngestResult};
use crate::gap::{GapDetector, GapReport};

/// Outcome of collecting one (symbol, timeframe) pair.
#[derive(Debug, Clone, Serialize)]
pub struct PairResult {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Raw candles returned by the exchange.
    pub fetched: usize,
    /// New rows written to the store.
    pub inserted: usize,
    /// Candles dropped by validation.
    pub rejected: usize,
    /// Newest candle accepted in this run.
    pub latest_timestamp: Option<i64>,
    pub error: Option<String>,
    pub error_kind: Option<&'static str>,
}

impl PairResult {
    fn succeeded(symbol: &str, timeframe: Timeframe, persisted: &Persisted) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            fetched: persisted.fetched,
            inserted: persisted.inserted,
            rejected: persisted.rejected,
            latest_timestamp: persisted.newest,
            error: None,
            error_kind: None,
        }
    }

    fn failed(symbol: &str, timeframe: Timeframe, err: &IngestError) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            fetched: 0,
            inserted: 0,
            rejected: 0,
            latest_timestamp: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of one live-price collection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PriceResult {
    pub requested: usize,
    /// Prices written (new or replaced).
    pub updated: usize,
    /// Prices written under a new (symbol, timestamp) key.
    pub inserted: usize,
    /// Whether the batch request failed and symbols were fetched one by one.
    pub used_fallback: bool,
    pub errors: BTreeMap<String, String>,
}

impl PriceResult {
    /// True when prices were requested and none could be stored.
    pub fn all_failed(&self) -> bool {
        self.requested > 0 && self.updated == 0
    }
}

/// Outcome of one full collection cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleResult {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub pairs: Vec<PairResult>,
    pub prices: PriceResult,
    pub gaps: Option<GapReport>,
    pub total_records: usize,
    pub total_errors: usize,
}

impl CycleResult {
    /// True when pairs were scheduled and every one of them failed.
    pub fn all_pairs_failed(&self) -> bool {
        !self.pairs.is_empty() && self.pairs.iter().all(|p| !p.is_success())
    }
}

/// Counts from validating and storing one batch of raw candles.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Persisted {
    pub fetched: usize,
    pub inserted: usize,
    pub rejected: usize,
    pub newest: Option<i64>,
}

/// Bounded-concurrency candle and price ingestion.
pub struct IngestionEngine {
    config: IngestConfig,
    validator: CandleValidator,
    exchange: Arc<dyn ExchangeClient>,
    store: Arc<dyn CandleStore>,
    limiter: Arc<RateLimiter>,
    statistics: Arc<Statistics>,
    clock: Arc<dyn Clock>,
    symbols: RwLock<Vec<String>>,
    timeframes: Vec<Timeframe>,
    price_cache: TtlCache<String, PriceTick>,
    symbol_cache: TtlCache<String, bool>,
    workers: Arc<Semaphore>,
    cycles: AtomicU64,
}

impl IngestionEngine {
    /// Create an engine with a default rate limiter, fresh statistics, the
    /// system clock and no symbols.
    pub fn new(
        config: IngestConfig,
        exchange: Arc<dyn ExchangeClient>,
        store: Arc<dyn CandleStore>,
    ) -> Self {
        let mode = if config.strict_validation {
            ValidationMode::Strict
        } else {
            ValidationMode::Lenient
        };
        let cache = CacheConfig::default();

        Self {
            validator: CandleValidator::new(mode),
            workers: Arc::new(Semaphore::new(config.max_workers.max(1))),
            limiter: Arc::new(RateLimiter::new(RateLimiterConfig::default())),
            statistics: Arc::new(Statistics::new()),
            clock: Arc::new(SystemClock),
            symbols: RwLock::new(Vec::new()),
            timeframes: Vec::new(),
            price_cache: TtlCache::new(Duration::from_secs(cache.price_ttl_secs)),
            symbol_cache: TtlCache::new(Duration::from_secs(cache.symbol_ttl_secs)),
            cycles: AtomicU64::new(0),
            config,
            exchange,
            store,
        }
    }

    /// Set the symbols and timeframes collected each cycle.
    pub fn with_universe(mut self, symbols: Vec<String>, timeframes: Vec<Timeframe>) -> Self {
        self.symbols = RwLock::new(symbols);
        self.timeframes = timeframes;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_statistics(mut self, statistics: Arc<Statistics>) -> Self {
        self.statistics = statistics;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cache_config(mut self, cache: &CacheConfig) -> Self {
        self.price_cache = TtlCache::new(Duration::from_secs(cache.price_ttl_secs));
        self.symbol_cache = TtlCache::new(Duration::from_secs(cache.symbol_ttl_secs));
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.statistics
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn store(&self) -> &Arc<dyn CandleStore> {
        &self.store
    }

    pub fn symbols(&self) -> Vec<String> {
        self.symbols.read().clone()
    }

    pub fn timeframes(&self) -> &[Timeframe] {
        &self.timeframes
    }

    pub fn now_secs(&self) -> i64 {
        self.clock.now_secs()
    }

    pub fn cycles_started(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn price_cache_stats(&self) -> CacheStats {
        self.price_cache.stats()
    }

    pub fn symbol_cache_stats(&self) -> CacheStats {
        self.symbol_cache.stats()
    }

    /// Drop expired price and symbol cache entries.
    pub fn purge_expired_caches(&self) -> usize {
        self.price_cache.purge_expired() + self.symbol_cache.purge_expired()
    }

    /// Run one exchange call through the limiter, retrying transient errors.
    async fn call_with_retry<'a, T, F>(
        &self,
        operation: &str,
        symbol: &str,
        mut call: F,
    ) -> ExchangeResult<T>
    where
        F: FnMut() -> BoxFuture<'a, ExchangeResult<T>>,
    {
        let mut attempt: u32 = 1;
        loop {
            let waited = self.limiter.acquire().await;
            if !waited.is_zero() {
                Metrics::rate_limit_wait(waited.as_secs_f64());
            }

            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    let backoff =
                        Duration::from_millis(self.config.retry_backoff_ms * u64::from(attempt));
                    warn!(
                        %operation,
                        %symbol,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Transient exchange error, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Validate raw candles, keep those accepted by `keep`, store the rest.
    ///
    /// Invalid candles are dropped and counted; they never fail the batch.
    pub(crate) async fn persist_candles<F>(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        raw: &[RawCandle],
        keep: F,
    ) -> IngestResult<Persisted>
    where
        F: Fn(i64) -> bool,
    {
        let mut accepted = Vec::with_capacity(raw.len());
        let mut rejected = 0;

        for (index, candle) in raw.iter().enumerate() {
            match self.validator.validate(candle, index) {
                Ok(c) if keep(c.timestamp) => accepted.push(c),
                Ok(_) => {}
                Err(e) => {
                    rejected += 1;
                    debug!(%symbol, %timeframe, error = %e, "Dropping invalid candle");
                    Metrics::candles_rejected(symbol, e.kind(), 1);
                }
            }
        }

        if rejected > 0 {
            warn!(%symbol, %timeframe, rejected, "Dropped invalid candles");
        }

        let inserted = if accepted.is_empty() {
            0
        } else {
            self.store
                .upsert_candles(symbol, timeframe, &accepted)
                .await?
        };
        Metrics::records_inserted("candles", symbol, inserted);

        Ok(Persisted {
            fetched: raw.len(),
            inserted,
            rejected,
            newest: accepted.iter().map(|c| c.timestamp).max(),
        })
    }

    /// Collect new candles for one pair.
    ///
    /// With history, requests from one interval after the newest stored
    /// candle, sized to the time elapsed since then. Without history,
    /// requests `initial_history_candles` of the most recent candles.
    pub async fn collect_ohlcv(&self, symbol: &str, timeframe: Timeframe) -> PairResult {
        match self.try_collect_ohlcv(symbol, timeframe).await {
            Ok(result) => result,
            Err(e) => self.pair_failed(symbol, timeframe, "ohlcv", e),
        }
    }

    async fn try_collect_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> IngestResult<PairResult> {
        let interval = timeframe.interval_secs();
        let latest = self.store.latest_timestamp(symbol, timeframe).await?;

        let (since, limit) = match latest {
            Some(last) => {
                let since = last + interval;
                let behind = (self.clock.now_secs() - since) / interval;
                let limit = behind.clamp(1, i64::from(self.config.max_candles_per_request));
                (Some(since), limit as u32)
            }
            None => (None, self.config.initial_history_candles),
        };

        let raw = self
            .call_with_retry("fetch_candles", symbol, || {
                self.exchange.fetch_candles(symbol, timeframe, since, limit)
            })
            .await?;

        let persisted = self
            .persist_candles(symbol, timeframe, &raw, |ts| {
                latest.map_or(true, |last| ts > last)
            })
            .await?;

        self.statistics
            .record_request(true, symbol, "ohlcv", persisted.inserted, None);
        debug!(
            %symbol,
            %timeframe,
            fetched = persisted.fetched,
            inserted = persisted.inserted,
            "Collected candles"
        );

        Ok(PairResult::succeeded(symbol, timeframe, &persisted))
    }

    fn pair_failed(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        kind: &str,
        err: IngestError,
    ) -> PairResult {
        if err.is_invalid_symbol() {
            self.symbol_cache.set(symbol.to_string(), false);
        }
        self.statistics
            .record_request(false, symbol, kind, 0, Some(err.kind()));
        warn!(%symbol, %timeframe, error_kind = err.kind(), error = %err, "Candle collection failed");
        PairResult::failed(symbol, timeframe, &err)
    }

    /// Collect every configured pair.
    pub async fn collect_all_ohlcv(self: &Arc<Self>) -> Vec<PairResult> {
        let timeframes = self.timeframes.clone();
        self.collect_timeframes(&timeframes).await
    }

    /// Collect every configured symbol for the given timeframes.
    ///
    /// At most `max_workers` pairs run at once and each pair is bounded by
    /// `task_timeout_secs`. Results are sorted by symbol then timeframe.
    pub async fn collect_timeframes(self: &Arc<Self>, timeframes: &[Timeframe]) -> Vec<PairResult> {
        let invalid: Arc<DashSet<String>> = Arc::new(DashSet::new());
        let mut tasks = JoinSet::new();

        for symbol in self.symbols() {
            for &timeframe in timeframes {
                let engine = Arc::clone(self);
                let invalid = Arc::clone(&invalid);
                let symbol = symbol.clone();
                tasks.spawn(async move { engine.run_pair_task(symbol, timeframe, invalid).await });
            }
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = %e, "Pair task aborted"),
            }
        }

        results.sort_by(|a, b| {
            a.symbol
                .cmp(&b.symbol)
                .then_with(|| a.timeframe.cmp(&b.timeframe))
        });
        results
    }

    async fn run_pair_task(
        self: Arc<Self>,
        symbol: String,
        timeframe: Timeframe,
        invalid: Arc<DashSet<String>>,
    ) -> PairResult {
        let _permit = match Arc::clone(&self.workers).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                return PairResult::failed(
                    &symbol,
                    timeframe,
                    &IngestError::TaskFailed(e.to_string()),
                )
            }
        };

        if invalid.contains(&symbol) {
            debug!(%symbol, %timeframe, "Skipping invalid symbol for this cycle");
            return PairResult::failed(
                &symbol,
                timeframe,
                &IngestError::InvalidSymbol(symbol.clone()),
            );
        }

        let task_timeout = self.config.task_timeout();
        let engine = Arc::clone(&self);
        let task_symbol = symbol.clone();
        let work = tokio::spawn(async move { engine.collect_ohlcv(&task_symbol, timeframe).await });
        let abort = work.abort_handle();

        let result = match tokio::time::timeout(task_timeout, work).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => self.pair_failed(
                &symbol,
                timeframe,
                "ohlcv",
                IngestError::TaskFailed(join_err.to_string()),
            ),
            Err(_) => {
                abort.abort();
                self.pair_failed(&symbol, timeframe, "ohlcv", IngestError::Timeout(task_timeout))
            }
        };

        if result.error_kind == Some("invalid_symbol") {
            invalid.insert(symbol);
        }
        result
    }

    /// Fetch and store live prices for every configured symbol.
    ///
    /// Uses one batched request; if the batch fails as a whole, falls back
    /// to one request per symbol. Each symbol succeeds or fails on its own.
    pub async fn collect_prices(&self) -> PriceResult {
        let symbols = self.symbols();
        let mut result = PriceResult {
            requested: symbols.len(),
            ..Default::default()
        };
        if symbols.is_empty() {
            return result;
        }

        let fetched: Vec<(String, IngestResult<PriceTick>)> = match self
            .call_with_retry("fetch_tickers", "*", || self.exchange.fetch_tickers(&symbols))
            .await
        {
            Ok(mut batch) => {
                Metrics::request("ticker_batch", true);
                symbols
                    .iter()
                    .map(|symbol| {
                        let tick = batch.ticks.remove(symbol).ok_or_else(|| {
                            IngestError::PriceUnavailable {
                                symbol: symbol.clone(),
                                reason: batch
                                    .errors
                                    .remove(symbol)
                                    .unwrap_or_else(|| "missing from batch".to_string()),
                            }
                        });
                        (symbol.clone(), tick)
                    })
                    .collect()
            }
            Err(e) => {
                Metrics::request("ticker_batch", false);
                warn!(error = %e, "Batch price request failed, fetching symbols individually");
                result.used_fallback = true;

                let mut out = Vec::with_capacity(symbols.len());
                for symbol in &symbols {
                    let tick = self
                        .call_with_retry("fetch_ticker", symbol, || {
                            self.exchange.fetch_ticker(symbol)
                        })
                        .await
                        .map_err(IngestError::from);
                    out.push((symbol.clone(), tick));
                }
                out
            }
        };

        for (symbol, tick) in fetched {
            match self.store_tick(tick).await {
                Ok(is_new) => {
                    result.updated += 1;
                    if is_new {
                        result.inserted += 1;
                    }
                    self.statistics.record_request(true, &symbol, "ticker", 1, None);
                }
                Err(e) => {
                    if e.is_invalid_symbol() {
                        self.symbol_cache.set(symbol.clone(), false);
                    }
                    warn!(%symbol, error_kind = e.kind(), error = %e, "Price collection failed");
                    self.statistics
                        .record_request(false, &symbol, "ticker", 0, Some(e.kind()));
                    result.errors.insert(symbol, e.to_string());
                }
            }
        }

        Metrics::records_inserted("prices", "all", result.updated);
        debug!(
            requested = result.requested,
            updated = result.updated,
            errors = result.errors.len(),
            "Collected prices"
        );
        result
    }

    async fn store_tick(&self, tick: IngestResult<PriceTick>) -> IngestResult<bool> {
        let tick = tick?;
        self.validator.validate_tick(&tick)?;
        let is_new = self.store.upsert_price(&tick).await?;
        self.price_cache.set(tick.symbol.clone(), tick);
        Ok(is_new)
    }

    /// Latest price for `symbol`, served from the price cache when fresh.
    pub async fn current_price(&self, symbol: &str) -> IngestResult<PriceTick> {
        if let Some(tick) = self.price_cache.get(symbol) {
            return Ok(tick);
        }

        let tick = self
            .call_with_retry("fetch_ticker", symbol, || self.exchange.fetch_ticker(symbol))
            .await?;
        self.validator.validate_tick(&tick)?;
        self.price_cache.set(symbol.to_string(), tick.clone());
        Ok(tick)
    }

    /// Whether the exchange knows `symbol`, served from the symbol cache.
    ///
    /// Errors other than an invalid symbol are returned, not cached.
    pub async fn check_symbol(&self, symbol: &str) -> IngestResult<bool> {
        if let Some(valid) = self.symbol_cache.get(symbol) {
            return Ok(valid);
        }

        match self
            .call_with_retry("fetch_ticker", symbol, || self.exchange.fetch_ticker(symbol))
            .await
        {
            Ok(tick) => {
                self.symbol_cache.set(symbol.to_string(), true);
                self.price_cache.set(symbol.to_string(), tick);
                Ok(true)
            }
            Err(ExchangeError::InvalidSymbol(_)) => {
                self.symbol_cache.set(symbol.to_string(), false);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drop configured symbols the exchange reports as invalid.
    ///
    /// Symbols that cannot be checked are kept. Returns the removed symbols.
    pub async fn retain_valid_symbols(&self) -> Vec<String> {
        let mut removed = Vec::new();
        for symbol in self.symbols() {
            match self.check_symbol(&symbol).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(%symbol, "Symbol not listed on exchange, removing");
                    removed.push(symbol);
                }
                Err(e) => warn!(%symbol, error = %e, "Could not verify symbol, keeping it"),
            }
        }

        if !removed.is_empty() {
            self.symbols.write().retain(|s| !removed.contains(s));
        }
        removed
    }

    /// Fetch and store the candles covering one gap.
    ///
    /// Requests `min(slots, max_candles_per_request)` candles starting at
    /// the gap start and keeps only those inside the gap. Returns the
    /// number of rows inserted.
    pub async fn backfill_gap(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        gap: GapRange,
    ) -> IngestResult<usize> {
        match self.try_backfill_gap(symbol, timeframe, gap).await {
            Ok(inserted) => {
                self.statistics
                    .record_request(true, symbol, "backfill", inserted, None);
                Ok(inserted)
            }
            Err(e) => {
                self.statistics
                    .record_request(false, symbol, "backfill", 0, Some(e.kind()));
                Err(e)
            }
        }
    }

    async fn try_backfill_gap(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        gap: GapRange,
    ) -> IngestResult<usize> {
        let needed = gap
            .slot_count(timeframe.interval_secs())
            .clamp(1, i64::from(self.config.max_candles_per_request)) as u32;

        let raw = self
            .call_with_retry("fetch_candles", symbol, || {
                self.exchange
                    .fetch_candles(symbol, timeframe, Some(gap.start), needed)
            })
            .await?;

        let persisted = self
            .persist_candles(symbol, timeframe, &raw, |ts| gap.contains(ts))
            .await?;

        debug!(
            %symbol,
            %timeframe,
            %gap,
            requested = needed,
            inserted = persisted.inserted,
            "Backfilled gap"
        );
        Ok(persisted.inserted)
    }

    /// Run the gap audit over the lookback window ending now.
    pub async fn audit_gaps(&self) -> GapReport {
        GapDetector::from_config(&self.config)
            .audit(self, self.clock.now_secs())
            .await
    }

    /// One full cycle: all candle pairs, then prices, then (every N-th
    /// cycle) a gap audit.
    pub async fn run_once(self: &Arc<Self>) -> CycleResult {
        let started = Instant::now();
        let started_at = Utc::now();
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;

        info!(cycle, "Starting collection cycle");

        let pairs = self.collect_all_ohlcv().await;
        let prices = self.collect_prices().await;

        let every = self.config.gap_audit_every_n_cycles;
        let gaps = if every > 0 && cycle % every == 0 {
            Some(self.audit_gaps().await)
        } else {
            None
        };

        let duration = started.elapsed();
        self.statistics.record_cycle(duration);

        let total_records = pairs.iter().map(|p| p.inserted).sum::<usize>()
            + prices.updated
            + gaps.as_ref().map_or(0, |g| g.records_inserted);
        let total_errors = pairs.iter().filter(|p| !p.is_success()).count()
            + prices.errors.len()
            + gaps.as_ref().map_or(0, |g| g.errors.len());

        info!(
            cycle,
            total_records,
            total_errors,
            duration_ms = duration.as_millis() as u64,
            "Collection cycle completed"
        );

        CycleResult {
            cycle,
            started_at,
            duration_secs: duration.as_secs_f64(),
            pairs,
            prices,
            gaps,
            total_records,
            total_errors,
        }
    }
}
