//! Tiered Cache - L1 / L2 / L3 Orchestration
//!
//! [`TieredCache::get_or_fetch`] is the only read path callers need:
//!
//! 1. L1 hit returns immediately
//! 2. With coalescing on, misses for one key queue on a per-key lock and
//!    re-check L1 once they hold it
//! 3. A fresh or stale L2 row populates L1 with the caller's TTL; a stale row
//!    also schedules a single background refresh
//! 4. Otherwise the caller's fetch runs once, L1 is populated and the L2
//!    write is handed to the background
//!
//! Only upstream failures surface, as [`Error::Fetch`]. Failed fetches are
//! never cached.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use super::entry::StalenessVerdict;
use super::key::CacheKey;
use super::local::LocalCache;
use super::metrics::{CacheMetrics, LatencyTracker, MetricsSnapshot};
use super::rest::RestSharedStore;
use super::shared::SharedCache;
use super::store::SharedStore;
use super::tasks::TaskSupervisor;
use crate::config::QuoteCacheConfig;
use crate::error::{Error, Result};

/// Three-tier stale-while-revalidate cache
pub struct TieredCache {
    local: Arc<LocalCache>,
    shared: Arc<SharedCache>,
    metrics: Arc<CacheMetrics>,
    tasks: TaskSupervisor,
    /// Per-key locks for coalescing concurrent misses
    in_flight: DashMap<CacheKey, Arc<Mutex<()>>>,
    /// Keys with a background refresh queued or running
    refreshing: Arc<DashSet<CacheKey>>,
    coalesce: bool,
}

impl TieredCache {
    /// Build a cache over an optional shared store
    pub fn new(config: &QuoteCacheConfig, store: Option<Arc<dyn SharedStore>>) -> Result<Self> {
        config.validate()?;

        let shared = match store {
            Some(store) => SharedCache::new(store, config.staleness.clone()),
            None => SharedCache::disabled(),
        };

        Ok(Self {
            local: Arc::new(LocalCache::with_config(config.local.clone())),
            shared: Arc::new(shared),
            metrics: Arc::new(CacheMetrics::new()),
            tasks: TaskSupervisor::new(&config.background),
            in_flight: DashMap::new(),
            refreshing: Arc::new(DashSet::new()),
            coalesce: config.coalesce_misses,
        })
    }

    /// Build from configuration, connecting the REST store when one is set
    pub fn from_config(config: &QuoteCacheConfig) -> Result<Self> {
        let store: Option<Arc<dyn SharedStore>> = match &config.shared {
            Some(rest) => {
                info!(url = %rest.url, table = %rest.table, "Using REST shared cache store");
                Some(Arc::new(RestSharedStore::new(rest.clone())?))
            }
            None => {
                info!("No shared cache store configured, running L1 only");
                None
            }
        };
        Self::new(config, store)
    }

    /// L1-only cache with default settings
    pub fn local_only() -> Self {
        Self {
            local: Arc::new(LocalCache::new()),
            shared: Arc::new(SharedCache::disabled()),
            metrics: Arc::new(CacheMetrics::new()),
            tasks: TaskSupervisor::default(),
            in_flight: DashMap::new(),
            refreshing: Arc::new(DashSet::new()),
            coalesce: true,
        }
    }

    /// Return the cached value for `key` or produce it with `fetch`
    ///
    /// `fetch` runs at most once per call, either in the foreground on a miss
    /// or in the background when a stale shared row is served.
    #[instrument(skip(self, fetch), fields(key = %key))]
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        fetch: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if let Some(value) = self.local.get::<T>(key) {
            self.metrics.record_l1_hit();
            return Ok(value);
        }
        self.metrics.record_l1_miss();

        let _in_flight = if self.coalesce {
            let guard = self.acquire_in_flight(key).await;
            if let Some(value) = self.local.get::<T>(key) {
                self.metrics.record_coalesced_hit();
                return Ok(value);
            }
            Some(guard)
        } else {
            None
        };

        // L2
        let tracker = LatencyTracker::start();
        let read = self.shared.read::<T>(key).await;
        if self.shared.is_enabled() {
            self.metrics.record_l2_read_latency(tracker.elapsed());
        }
        self.metrics.record_l2_read(read.outcome, read.verdict);

        if let Some(value) = read.value {
            self.local.set(key.clone(), value.clone(), ttl);
            if read.verdict == StalenessVerdict::Stale {
                self.schedule_refresh(key, ttl, fetch);
            }
            return Ok(value);
        }

        // L3
        let tracker = LatencyTracker::start();
        let result = fetch().await;
        self.metrics.record_l3_fetch_latency(tracker.elapsed());

        match result {
            Ok(value) => {
                self.metrics.record_l3_fetch(true);
                self.local.set(key.clone(), value.clone(), ttl);
                self.schedule_write(key, value.clone(), ttl);
                Ok(value)
            }
            Err(source) => {
                self.metrics.record_l3_fetch(false);
                warn!(error = %source, "Upstream fetch failed");
                Err(Error::fetch(key.as_str(), source))
            }
        }
    }

    /// Cached value from L1 or a usable L2 row, without fetching
    pub async fn get_cached<T>(&self, key: &CacheKey) -> Option<T>
    where
        T: DeserializeOwned + Clone + Any + Send + Sync,
    {
        if let Some(value) = self.local.get::<T>(key) {
            return Some(value);
        }
        self.shared.read::<T>(key).await.value
    }

    /// Drop the L1 entry for `key`; the shared row is left alone
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.local.remove(key)
    }

    /// Sweep expired L1 entries
    pub fn purge_expired(&self) -> usize {
        self.local.purge_expired()
    }

    /// Wait for queued refreshes and L2 writes
    pub async fn drain(&self) {
        self.tasks.drain().await;
    }

    /// Cancel background work and stop accepting more
    pub async fn shutdown(&self) {
        info!(active = self.tasks.active(), "Shutting down tiered cache");
        self.tasks.shutdown().await;
    }

    /// Get cache metrics
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.update_l1_entries(self.local.len() as u64);
        self.metrics.snapshot()
    }

    /// Metrics in Prometheus text format
    pub fn render_prometheus(&self) -> Result<String> {
        self.metrics().render_prometheus()
    }

    /// True when the shared tier is configured and reachable
    pub async fn health_check(&self) -> bool {
        self.shared.health_check().await
    }

    pub fn local(&self) -> &LocalCache {
        &self.local
    }

    pub fn shared(&self) -> &SharedCache {
        &self.shared
    }

    pub fn tasks(&self) -> &TaskSupervisor {
        &self.tasks
    }

    async fn acquire_in_flight(&self, key: &CacheKey) -> InFlight<'_> {
        let lock = Arc::clone(self.in_flight.entry(key.clone()).or_default().value());

        let guard = match Arc::clone(&lock).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                self.metrics.record_coalesced_wait();
                debug!("Waiting on in-flight lookup");
                lock.lock_owned().await
            }
        };

        InFlight {
            map: &self.in_flight,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    fn schedule_write<T>(&self, key: &CacheKey, value: T, ttl: Duration)
    where
        T: Serialize + Send + Sync + 'static,
    {
        if !self.shared.is_enabled() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let metrics = Arc::clone(&self.metrics);
        let key = key.clone();
        self.tasks.spawn("l2-write", async move {
            write_shared(&shared, &metrics, &key, &value, ttl).await;
        });
    }

    fn schedule_refresh<T, F, Fut>(&self, key: &CacheKey, ttl: Duration, fetch: F)
    where
        T: Serialize + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if !self.refreshing.insert(key.clone()) {
            self.metrics.record_refresh_skipped();
            debug!("Refresh already in progress");
            return;
        }

        // Clears the refreshing mark however the job ends, even if never polled
        let marker = RefreshMarker {
            set: Arc::clone(&self.refreshing),
            key: key.clone(),
        };
        let local = Arc::clone(&self.local);
        let shared = Arc::clone(&self.shared);
        let metrics = Arc::clone(&self.metrics);
        let key = key.clone();

        let spawned = self.tasks.spawn("refresh", async move {
            let _marker = marker;
            match fetch().await {
                Ok(value) => {
                    local.set(key.clone(), value.clone(), ttl);
                    write_shared(&shared, &metrics, &key, &value, ttl).await;
                    metrics.record_refresh_done(true);
                    debug!(key = %key, "Background refresh complete");
                }
                Err(e) => {
                    metrics.record_refresh_done(false);
                    warn!(key = %key, error = %e, "Background refresh failed");
                }
            }
        });

        if spawned {
            self.metrics.record_refresh_scheduled();
        }
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("l1_entries", &self.local.len())
            .field("shared_enabled", &self.shared.is_enabled())
            .field("coalesce", &self.coalesce)
            .finish()
    }
}

async fn write_shared<T: Serialize>(
    shared: &SharedCache,
    metrics: &CacheMetrics,
    key: &CacheKey,
    value: &T,
    ttl: Duration,
) -> bool {
    let tracker = LatencyTracker::start();
    let ok = shared.write(key, value, ttl_seconds(ttl)).await;
    metrics.record_l2_write_latency(tracker.elapsed());
    metrics.record_l2_write(ok);
    ok
}

/// Whole seconds for the shared row, rounded up
fn ttl_seconds(ttl: Duration) -> i64 {
    ttl.as_secs_f64().ceil() as i64
}

/// Held while a key's lookup runs; waiters queue on the same mutex
struct InFlight<'a> {
    map: &'a DashMap<CacheKey, Arc<Mutex<()>>>,
    key: CacheKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Last holder removes the lock so the map only tracks live lookups
        self.map
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

struct RefreshMarker {
    set: Arc<DashSet<CacheKey>>,
    key: CacheKey,
}

impl Drop for RefreshMarker {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::InMemorySharedStore;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ticker {
        symbol: String,
        price: f64,
    }

    fn ticker(price: f64) -> Ticker {
        Ticker {
            symbol: "BTCUSDT".into(),
            price,
        }
    }

    fn key() -> CacheKey {
        CacheKey::builder("binance", "ticker").param("symbol", "BTCUSDT").build()
    }

    fn cache_with(store: &Arc<InMemorySharedStore>) -> TieredCache {
        TieredCache::new(&QuoteCacheConfig::default(), Some(store.clone())).unwrap()
    }

    #[test]
    fn test_ttl_seconds_rounds_up() {
        assert_eq!(ttl_seconds(Duration::from_secs(60)), 60);
        assert_eq!(ttl_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(ttl_seconds(Duration::ZERO), 0);
    }

    #[tokio::test]
    async fn test_in_flight_locks_are_released() {
        let cache = TieredCache::local_only();
        let value: u32 = cache
            .get_or_fetch(&key(), Duration::from_secs(60), || async { Ok(5u32) })
            .await
            .unwrap();

        assert_eq!(value, 5);
        assert!(cache.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_mark_cleared_when_rejected() {
        let store = Arc::new(InMemorySharedStore::new());
        store.insert_aged(
            key().as_str(),
            json!({"symbol": "BTCUSDT", "price": 1.0}),
            60,
            Duration::from_secs(90),
        );
        let cache = cache_with(&store);
        cache.shutdown().await;

        let value: Ticker = cache
            .get_or_fetch(&key(), Duration::from_secs(60), || async { Ok(ticker(2.0)) })
            .await
            .unwrap();

        assert_eq!(value, ticker(1.0));
        assert!(cache.refreshing.is_empty());
        assert_eq!(cache.metrics().refreshes_scheduled, 0);
    }

    #[tokio::test]
    async fn test_duplicate_refresh_skipped() {
        let store = Arc::new(InMemorySharedStore::new());
        store.insert_aged(
            key().as_str(),
            json!({"symbol": "BTCUSDT", "price": 1.0}),
            60,
            Duration::from_secs(90),
        );
        let cache = cache_with(&store);
        let refreshes = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let refreshes = Arc::clone(&refreshes);
            let value: Ticker = cache
                .get_or_fetch(&key(), Duration::from_secs(60), move || async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    refreshes.fetch_add(1, Ordering::SeqCst);
                    Ok(ticker(2.0))
                })
                .await
                .unwrap();
            assert_eq!(value, ticker(1.0));
            // Force the next call back to L2 while the refresh is still running
            cache.invalidate(&key());
        }

        cache.drain().await;
        let snapshot = cache.metrics();
        assert_eq!(snapshot.refreshes_scheduled, 1);
        assert_eq!(snapshot.refreshes_skipped, 1);
        assert_eq!(snapshot.refreshes_completed, 1);
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert!(cache.refreshing.is_empty());
    }
}
