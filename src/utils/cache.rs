//! In-memory TTL cache
//!
//! Thread-safe cache over DashMap, shared by the pre-filter (verdicts per
//! contract), the price oracle and the decimals lookup.
//!
//! - TTL-based expiration per cache instance
//! - Key normalization (lowercase, so checksummed and plain addresses collide)
//! - Hit/miss counters for /status

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Cache entry with creation time for TTL validation
#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }

    pub fn remaining_ttl(&self) -> Duration {
        self.ttl.saturating_sub(self.created_at.elapsed())
    }
}

/// TTL cache keyed by lowercase string
#[derive(Clone)]
pub struct TtlCache<V: Clone> {
    name: &'static str,
    store: Arc<DashMap<String, CacheEntry<V>>>,
    ttl: Duration,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            store: Arc::new(DashMap::new()),
            ttl,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    #[inline]
    fn normalize(key: &str) -> String {
        key.to_lowercase()
    }

    /// Returns the value when present and not expired
    pub fn get(&self, key: &str) -> Option<V> {
        let key = Self::normalize(key);

        if let Some(entry) = self.store.get(&key) {
            if entry.is_expired() {
                drop(entry);
                self.store.remove(&key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("📭 {} cache miss (expired): {}", self.name, key);
                None
            } else {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "✅ {} cache hit: {} ({}s left)",
                    self.name,
                    key,
                    entry.remaining_ttl().as_secs()
                );
                Some(entry.value.clone())
            }
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn set(&self, key: &str, value: V) {
        let entry = CacheEntry {
            value,
            created_at: Instant::now(),
            ttl: self.ttl,
        };
        self.store.insert(Self::normalize(key), entry);
    }

    pub fn invalidate(&self, key: &str) {
        self.store.remove(&Self::normalize(key));
    }

    /// Drop every expired entry, returns how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let before = self.store.len();
        self.store.retain(|_, entry| !entry.is_expired());
        let removed = before - self.store.len();
        if removed > 0 {
            debug!("🧹 {} cache: {} expired entries removed", self.name, removed);
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        CacheStats {
            name: self.name,
            entries: self.store.len(),
            hits,
            misses,
            hit_rate,
            ttl_secs: self.ttl.as_secs(),
        }
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub name: &'static str,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub ttl_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_set_get() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        cache.set("0xdAC17F958D2ee523a2206206994597C13D831ec7", 6u8);
        assert_eq!(cache.get("0xdac17f958d2ee523a2206206994597c13d831ec7"), Some(6));
    }

    #[test]
    fn test_cache_expiry() {
        let cache = TtlCache::new("test", Duration::from_millis(0));
        cache.set("k", 1u8);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
        cache.set("k", 1u8);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.cleanup_expired(), 1);
    }

    #[test]
    fn test_cache_stats() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        cache.set("a", 1.5f64);
        cache.get("a");
        cache.get("b");
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 50.0).abs() < f64::EPSILON);
    }
}
