//! Sharded Map Implementation
//!
//! Concurrent map keyed by [`CacheKey`], split into a power-of-two number of
//! shards. Each shard has its own `RwLock`, so a write only blocks readers of
//! keys routed to the same shard.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::key::CacheKey;

/// Single shard containing a hashmap and statistics
pub struct Shard<V> {
    map: RwLock<HashMap<CacheKey, V>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl<V> Default for Shard<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Shard<V> {
    /// Create a new empty shard
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of entries in this shard
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Get a clone of the value
    pub fn get(&self, key: &CacheKey) -> Option<V>
    where
        V: Clone,
    {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.map.read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &CacheKey) -> bool {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.map.read().contains_key(key)
    }

    /// Insert a value, returning the old value if present
    pub fn insert(&self, key: CacheKey, value: V) -> Option<V> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.map.write().insert(key, value)
    }

    pub fn remove(&self, key: &CacheKey) -> Option<V> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.map.write().remove(key)
    }

    /// Remove the entry only while `pred` still holds for it
    pub fn remove_if(&self, key: &CacheKey, pred: impl FnOnce(&V) -> bool) -> Option<V> {
        let mut guard = self.map.write();
        if guard.get(key).is_some_and(pred) {
            self.writes.fetch_add(1, Ordering::Relaxed);
            return guard.remove(key);
        }
        None
    }

    /// Drop every entry for which `keep` returns false; returns how many went
    pub fn retain(&self, mut keep: impl FnMut(&CacheKey, &V) -> bool) -> usize {
        let mut guard = self.map.write();
        let before = guard.len();
        guard.retain(|k, v| keep(k, v));
        before - guard.len()
    }

    pub fn clear(&self) {
        self.map.write().clear();
    }

    /// Snapshot of all entries (for eviction scans)
    pub fn entries(&self) -> Vec<(CacheKey, V)>
    where
        V: Clone,
    {
        self.map
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Map split into `shard_count` independently locked shards
pub struct ShardedMap<V> {
    shards: Box<[Shard<V>]>,
}

impl<V> ShardedMap<V> {
    /// Create a map with `shard_count` shards, rounded up to a power of two
    pub fn new(shard_count: usize) -> Self {
        let count = shard_count.max(1).next_power_of_two();
        let shards: Vec<Shard<V>> = (0..count).map(|_| Shard::new()).collect();
        Self {
            shards: shards.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    fn shard_for(&self, key: &CacheKey) -> &Shard<V> {
        &self.shards[key.shard_index(self.shards.len())]
    }

    /// Shard by position
    #[inline]
    pub fn shard(&self, index: usize) -> &Shard<V> {
        &self.shards[index % self.shards.len()]
    }

    pub fn shards(&self) -> impl Iterator<Item = &Shard<V>> {
        self.shards.iter()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    pub fn total_reads(&self) -> u64 {
        self.shards.iter().map(|s| s.read_count()).sum()
    }

    pub fn total_writes(&self) -> u64 {
        self.shards.iter().map(|s| s.write_count()).sum()
    }

    pub fn get(&self, key: &CacheKey) -> Option<V>
    where
        V: Clone,
    {
        self.shard_for(key).get(key)
    }

    pub fn contains_key(&self, key: &CacheKey) -> bool {
        self.shard_for(key).contains_key(key)
    }

    pub fn insert(&self, key: CacheKey, value: V) -> Option<V> {
        self.shard_for(&key).insert(key, value)
    }

    pub fn remove(&self, key: &CacheKey) -> Option<V> {
        self.shard_for(key).remove(key)
    }

    pub fn remove_if(&self, key: &CacheKey, pred: impl FnOnce(&V) -> bool) -> Option<V> {
        self.shard_for(key).remove_if(key, pred)
    }

    /// Apply `keep` across every shard, one shard lock at a time
    pub fn retain(&self, mut keep: impl FnMut(&CacheKey, &V) -> bool) -> usize {
        self.shards.iter().map(|s| s.retain(&mut keep)).sum()
    }

    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.clear();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
