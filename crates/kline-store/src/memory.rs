//! In-memory store.

use std::collections::{BTreeMap, HashMap};

use kline_core::{BoxFuture, Candle, PriceTick, Timeframe};
use parking_lot::RwLock;

use crate::error::StoreResult;
use crate::store::{CandleStore, CleanupReport, StoreStats};

type SeriesKey = (String, Timeframe);

/// Deduplicating candle and price tables.
///
/// Shared by `MemoryStore` and the in-memory view of `JsonlStore`.
#[derive(Debug, Clone, Default)]
pub(crate) struct CandleIndex {
    candles: HashMap<SeriesKey, BTreeMap<i64, Candle>>,
    prices: HashMap<String, BTreeMap<i64, PriceTick>>,
}

impl CandleIndex {
    /// Candles from `candles` whose key is not stored yet, first occurrence
    /// wins within the batch as well.
    pub(crate) fn new_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Vec<Candle> {
        let existing = self.candles.get(&(symbol.to_string(), timeframe));
        let mut seen = std::collections::HashSet::with_capacity(candles.len());
        candles
            .iter()
            .filter(|c| existing.map_or(true, |series| !series.contains_key(&c.timestamp)))
            .filter(|c| seen.insert(c.timestamp))
            .copied()
            .collect()
    }

    /// Insert candles, ignoring existing keys. Returns the inserted count.
    pub(crate) fn insert_candles(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> usize {
        let series = self
            .candles
            .entry((symbol.to_string(), timeframe))
            .or_default();
        let mut inserted = 0;
        for c in candles {
            if let std::collections::btree_map::Entry::Vacant(slot) = series.entry(c.timestamp) {
                slot.insert(*c);
                inserted += 1;
            }
        }
        inserted
    }

    /// Insert or replace a price. Returns `true` when the key was new.
    pub(crate) fn upsert_price(&mut self, tick: &PriceTick) -> bool {
        self.prices
            .entry(tick.symbol.clone())
            .or_default()
            .insert(tick.timestamp, tick.clone())
            .is_none()
    }

    pub(crate) fn latest_timestamp(&self, symbol: &str, timeframe: Timeframe) -> Option<i64> {
        self.candles
            .get(&(symbol.to_string(), timeframe))
            .and_then(|series| series.keys().next_back().copied())
    }

    pub(crate) fn candles_in_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> Vec<Candle> {
        if end < start {
            return Vec::new();
        }
        self.candles
            .get(&(symbol.to_string(), timeframe))
            .map(|series| series.range(start..=end).map(|(_, c)| *c).collect())
            .unwrap_or_default()
    }

    pub(crate) fn latest_price(&self, symbol: &str) -> Option<PriceTick> {
        self.prices
            .get(symbol)
            .and_then(|ticks| ticks.values().next_back().cloned())
    }

    pub(crate) fn delete_older_than(&mut self, cutoff: i64) -> CleanupReport {
        let mut report = CleanupReport::default();
        for series in self.candles.values_mut() {
            let kept = series.split_off(&cutoff);
            report.candles_deleted += series.len();
            *series = kept;
        }
        for ticks in self.prices.values_mut() {
            let kept = ticks.split_off(&cutoff);
            report.prices_deleted += ticks.len();
            *ticks = kept;
        }
        self.candles.retain(|_, series| !series.is_empty());
        self.prices.retain(|_, ticks| !ticks.is_empty());
        report
    }

    pub(crate) fn stats(&self) -> StoreStats {
        StoreStats {
            candle_rows: self.candles.values().map(BTreeMap::len).sum(),
            price_rows: self.prices.values().map(BTreeMap::len).sum(),
            series: self.candles.len(),
            oldest_candle: self
                .candles
                .values()
                .filter_map(|s| s.keys().next().copied())
                .min(),
            newest_candle: self
                .candles
                .values()
                .filter_map(|s| s.keys().next_back().copied())
                .max(),
        }
    }

    /// All rows, for compaction.
    pub(crate) fn iter_candles(&self) -> impl Iterator<Item = (&SeriesKey, &Candle)> {
        self.candles
            .iter()
            .flat_map(|(key, series)| series.values().map(move |c| (key, c)))
    }

    pub(crate) fn iter_prices(&self) -> impl Iterator<Item = &PriceTick> {
        self.prices.values().flat_map(|ticks| ticks.values())
    }
}

/// Volatile store backed by ordered maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    index: RwLock<CandleIndex>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CandleStore for MemoryStore {
    fn latest_timestamp<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
    ) -> BoxFuture<'a, StoreResult<Option<i64>>> {
        Box::pin(async move { Ok(self.index.read().latest_timestamp(symbol, timeframe)) })
    }

    fn upsert_candles<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
        candles: &'a [Candle],
    ) -> BoxFuture<'a, StoreResult<usize>> {
        Box::pin(async move {
            Ok(self
                .index
                .write()
                .insert_candles(symbol, timeframe, candles))
        })
    }

    fn upsert_price<'a>(&'a self, tick: &'a PriceTick) -> BoxFuture<'a, StoreResult<bool>> {
        Box::pin(async move { Ok(self.index.write().upsert_price(tick)) })
    }

    fn timestamps_in_range<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> BoxFuture<'a, StoreResult<Vec<i64>>> {
        Box::pin(async move {
            Ok(self
                .index
                .read()
                .candles_in_range(symbol, timeframe, start, end)
                .into_iter()
                .map(|c| c.timestamp)
                .collect())
        })
    }

    fn candles_in_range<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> BoxFuture<'a, StoreResult<Vec<Candle>>> {
        Box::pin(async move {
            Ok(self
                .index
                .read()
                .candles_in_range(symbol, timeframe, start, end))
        })
    }

    fn latest_price<'a>(
        &'a self,
        symbol: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<PriceTick>>> {
        Box::pin(async move { Ok(self.index.read().latest_price(symbol)) })
    }

    fn delete_older_than(&self, cutoff: i64) -> BoxFuture<'_, StoreResult<CleanupReport>> {
        Box::pin(async move { Ok(self.index.write().delete_older_than(cutoff)) })
    }

    fn stats(&self) -> BoxFuture<'_, StoreResult<StoreStats>> {
        Box::pin(async move { Ok(self.index.read().stats()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64) -> Candle {
        Candle::new(ts, 1.0, 2.0, 0.5, 1.5, 10.0)
    }

    fn tick(symbol: &str, ts: i64, price: f64) -> PriceTick {
        PriceTick {
            symbol: symbol.to_string(),
            price,
            volume_24h: None,
            change_24h: None,
            change_pct_24h: None,
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let batch: Vec<Candle> = (0..5).map(|i| candle(i * 60)).collect();

        assert_eq!(store.upsert_candles("BTC/USDT", Timeframe::M1, &batch).await.unwrap(), 5);
        assert_eq!(store.upsert_candles("BTC/USDT", Timeframe::M1, &batch).await.unwrap(), 0);
        assert_eq!(store.stats().await.unwrap().candle_rows, 5);
    }

    #[tokio::test]
    async fn test_first_write_wins() {
        let store = MemoryStore::new();
        store
            .upsert_candles("BTC/USDT", Timeframe::M1, &[candle(60)])
            .await
            .unwrap();
        let mut changed = candle(60);
        changed.close = 1.9;
        store
            .upsert_candles("BTC/USDT", Timeframe::M1, &[changed])
            .await
            .unwrap();

        let stored = store
            .candles_in_range("BTC/USDT", Timeframe::M1, 0, 120)
            .await
            .unwrap();
        assert_eq!(stored, vec![candle(60)]);
    }

    #[tokio::test]
    async fn test_duplicates_within_batch_counted_once() {
        let store = MemoryStore::new();
        let inserted = store
            .upsert_candles("BTC/USDT", Timeframe::M1, &[candle(60), candle(60)])
            .await
            .unwrap();
        assert_eq!(inserted, 1);
    }

    #[tokio::test]
    async fn test_series_are_isolated() {
        let store = MemoryStore::new();
        store
            .upsert_candles("BTC/USDT", Timeframe::M1, &[candle(60)])
            .await
            .unwrap();
        assert_eq!(
            store.latest_timestamp("BTC/USDT", Timeframe::M5).await.unwrap(),
            None
        );
        assert_eq!(
            store.latest_timestamp("ETH/USDT", Timeframe::M1).await.unwrap(),
            None
        );
        assert_eq!(
            store.latest_timestamp("BTC/USDT", Timeframe::M1).await.unwrap(),
            Some(60)
        );
    }

    #[tokio::test]
    async fn test_price_replace() {
        let store = MemoryStore::new();
        assert!(store.upsert_price(&tick("BTC/USDT", 100, 1.0)).await.unwrap());
        assert!(!store.upsert_price(&tick("BTC/USDT", 100, 2.0)).await.unwrap());

        let latest = store.latest_price("BTC/USDT").await.unwrap().unwrap();
        assert_eq!(latest.price, 2.0);
        assert_eq!(store.stats().await.unwrap().price_rows, 1);
    }

    #[tokio::test]
    async fn test_range_and_cleanup() {
        let store = MemoryStore::new();
        let batch: Vec<Candle> = (0..10).map(|i| candle(i * 60)).collect();
        store
            .upsert_candles("BTC/USDT", Timeframe::M1, &batch)
            .await
            .unwrap();
        store.upsert_price(&tick("BTC/USDT", 30, 1.0)).await.unwrap();
        store.upsert_price(&tick("BTC/USDT", 400, 1.0)).await.unwrap();

        let ts = store
            .timestamps_in_range("BTC/USDT", Timeframe::M1, 120, 240)
            .await
            .unwrap();
        assert_eq!(ts, vec![120, 180, 240]);

        let report = store.delete_older_than(300).await.unwrap();
        assert_eq!(report.candles_deleted, 5);
        assert_eq!(report.prices_deleted, 1);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.candle_rows, 5);
        assert_eq!(stats.oldest_candle, Some(300));
        assert_eq!(stats.newest_candle, Some(540));
    }
}
