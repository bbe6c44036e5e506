//! L1 Cache - In-Process Store
//!
//! Per-process cache with per-entry TTL and type-erased values. No I/O and
//! no awaiting: every operation takes a single shard lock.
//!
//! # Design
//!
//! - [`ShardedMap`] so concurrent callers rarely share a lock
//! - Expired entries are dropped lazily on read; [`LocalCache::purge_expired`]
//!   sweeps the rest
//! - Optional entry bound: when full, expired entries go first, then the
//!   oldest, down to `low_watermark` of the bound so the scan is not repeated
//!   on every insert

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::entry::LocalEntry;
use super::key::CacheKey;
use super::shard::ShardedMap;
use super::DEFAULT_SHARD_COUNT;

/// L1 configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalCacheConfig {
    /// Number of shards (rounded up to a power of two)
    pub shard_count: usize,
    /// Maximum number of entries (`None` = unbounded)
    pub max_entries: Option<usize>,
    /// Fraction of `max_entries` an eviction pass shrinks the cache to
    pub low_watermark: f64,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
            max_entries: None,
            low_watermark: 0.80,
        }
    }
}

impl LocalCacheConfig {
    /// Entry count an eviction pass stops at; always leaves room for one insert
    fn eviction_target(&self, max: usize) -> usize {
        let watermark = if self.low_watermark.is_finite() {
            self.low_watermark.clamp(0.0, 1.0)
        } else {
            0.0
        };
        ((max as f64 * watermark) as usize).min(max.saturating_sub(1))
    }
}

/// In-process cache
pub struct LocalCache {
    storage: ShardedMap<LocalEntry>,
    config: LocalCacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl LocalCache {
    /// Create with default configuration
    pub fn new() -> Self {
        Self::with_config(LocalCacheConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(config: LocalCacheConfig) -> Self {
        Self {
            storage: ShardedMap::new(config.shard_count),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Get a live value stored as `T`
    ///
    /// Missing, expired and differently-typed entries all read as `None`.
    pub fn get<T: Any + Clone>(&self, key: &CacheKey) -> Option<T> {
        let Some(entry) = self.storage.get(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if entry.is_expired() {
            // Only drop the entry we looked at; a concurrent set may have replaced it
            let stored_at = entry.stored_at();
            self.storage.remove_if(key, |e| e.stored_at() == stored_at);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        match entry.downcast::<T>() {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            None => {
                debug!(
                    key = %key,
                    stored = entry.type_name(),
                    requested = std::any::type_name::<T>(),
                    "L1 type mismatch, treating as miss"
                );
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `value`, replacing whatever the key held
    pub fn set<T: Any + Send + Sync>(&self, key: CacheKey, value: T, ttl: Duration) {
        if let Some(max) = self.config.max_entries {
            if !self.storage.contains_key(&key) && self.storage.len() >= max {
                self.evict(max);
            }
        }
        self.storage.insert(key, LocalEntry::new(value, ttl));
    }

    /// Remove an entry
    pub fn remove(&self, key: &CacheKey) -> bool {
        self.storage.remove(key).is_some()
    }

    /// True if a live entry exists (any type)
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.storage
            .get(key)
            .map(|e| !e.is_expired())
            .unwrap_or(false)
    }

    /// TTL the live entry for `key` was stored with
    pub fn ttl_of(&self, key: &CacheKey) -> Option<Duration> {
        self.storage
            .get(key)
            .filter(|e| !e.is_expired())
            .map(|e| e.ttl())
    }

    /// Drop every expired entry; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let removed = self.storage.retain(|_, e| !e.is_expired());
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, "Purged expired L1 entries");
        }
        removed
    }

    /// Shrink to the low watermark once `max` is reached
    fn evict(&self, max: usize) {
        let target = self.config.eviction_target(max);
        self.purge_expired();
        let len = self.storage.len();
        if len <= target {
            return;
        }

        // Oldest first
        let mut candidates: Vec<_> = self
            .storage
            .shards()
            .flat_map(|s| s.entries())
            .map(|(k, e)| (k, e.stored_at()))
            .collect();
        candidates.sort_by_key(|(_, stored_at)| *stored_at);

        let mut evicted = 0u64;
        for (key, stored_at) in candidates.into_iter().take(len - target) {
            if self
                .storage
                .remove_if(&key, |e| e.stored_at() == stored_at)
                .is_some()
            {
                evicted += 1;
            }
        }
        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        debug!(evicted, target, "L1 eviction pass");
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn clear(&self) {
        self.storage.clear();
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    pub fn config(&self) -> &LocalCacheConfig {
        &self.config
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
