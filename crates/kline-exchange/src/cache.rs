//! Short-TTL key/value cache.
//!
//! Entries expire lazily: an entry older than the TTL is reported as a
//! miss but stays in the map until it is overwritten or `purge_expired`
//! runs.

use dashmap::DashMap;
use serde::Serialize;
use std::borrow::Borrow;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

/// Cache occupancy.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub ttl_secs: u64,
}

/// Concurrent cache with a single TTL for all entries.
pub struct TtlCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Value for `key` if it was stored less than one TTL ago.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries
            .get(key)
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone())
    }

    pub fn set(&self, key: K, value: V) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    pub fn stats(&self) -> CacheStats {
        let total = self.entries.len();
        let valid = self
            .entries
            .iter()
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .count();
        CacheStats {
            total_entries: total,
            valid_entries: valid,
            expired_entries: total.saturating_sub(valid),
            ttl_secs: self.ttl.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set() {
        let cache = TtlCache::new(Duration::from_secs(60));
        assert_eq!(cache.get(&"BTC/USDT"), None);

        cache.set("BTC/USDT", 50_000.0);
        assert_eq!(cache.get(&"BTC/USDT"), Some(50_000.0));

        cache.set("BTC/USDT", 51_000.0);
        assert_eq!(cache.get(&"BTC/USDT"), Some(51_000.0));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_a_miss_but_counted() {
        let cache = TtlCache::new(Duration::from_millis(20));
        cache.set("ETH/USDT", 3_000.0);
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.get(&"ETH/USDT"), None);
        let stats = cache.stats();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.valid_entries, 0);
        assert_eq!(stats.expired_entries, 1);

        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }
}
