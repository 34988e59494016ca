//! Query result cache.
//!
//! Results are stored under the query's cache key together with its cache
//! groups, so that a whole group can be dropped when the underlying data
//! changes. When full, the least recently used entry is evicted.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use dashmap::DashMap;
use tracing::trace;

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    /// Get hit count.
    pub fn hits(&self) -> u64 {
        self.hits.load(AtomicOrdering::Relaxed)
    }

    /// Get miss count.
    pub fn misses(&self) -> u64 {
        self.misses.load(AtomicOrdering::Relaxed)
    }

    /// Get eviction count.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(AtomicOrdering::Relaxed)
    }

    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

struct CacheEntry<V> {
    value: V,
    groups: Vec<String>,
    last_used: AtomicU64,
}

/// Thread-safe result cache keyed by query cache key.
pub struct QueryCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    capacity: usize,
    clock: AtomicU64,
    stats: CacheStats,
}

impl<V: Clone> QueryCache<V> {
    /// Create a cache holding at most `capacity` results. Zero disables it.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            clock: AtomicU64::new(0),
            stats: CacheStats::default(),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, AtomicOrdering::Relaxed) + 1
    }

    /// Cached result for `key`.
    pub fn get(&self, key: &str) -> Option<V> {
        match self.entries.get(key) {
            Some(entry) => {
                entry.last_used.store(self.tick(), AtomicOrdering::Relaxed);
                self.stats.hits.fetch_add(1, AtomicOrdering::Relaxed);
                trace!(key, "query cache hit");
                Some(entry.value.clone())
            }
            None => {
                self.stats.misses.fetch_add(1, AtomicOrdering::Relaxed);
                trace!(key, "query cache miss");
                None
            }
        }
    }

    /// Store a result.
    pub fn put(&self, key: impl Into<String>, value: V, groups: &[String]) {
        if self.capacity == 0 {
            return;
        }
        let key = key.into();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                groups: groups.to_vec(),
                last_used: AtomicU64::new(self.tick()),
            },
        );
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.last_used.load(AtomicOrdering::Relaxed))
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.stats.evictions.fetch_add(1, AtomicOrdering::Relaxed);
            trace!(key = %key, "query cache eviction");
        }
    }

    /// Drop one result.
    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|(_, e)| e.value)
    }

    /// Drop every result in `group`, returning how many were dropped.
    pub fn invalidate_group(&self, group: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.groups.iter().any(|g| g == group));
        before - self.entries.len()
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
