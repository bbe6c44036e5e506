//! Cache Metrics Collection
//!
//! Per-tier counters and latency averages for monitoring cache health, with
//! Prometheus text exposition.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use prometheus::{Encoder, Gauge, IntCounterVec, Opts, Registry, TextEncoder};

use super::entry::StalenessVerdict;
use super::shared::ReadOutcome;
use crate::error::{Error, Result};

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // L1
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l1_entries: AtomicU64,

    // L2 reads
    l2_fresh: AtomicU64,
    l2_stale: AtomicU64,
    l2_expired: AtomicU64,
    l2_misses: AtomicU64,
    l2_errors: AtomicU64,
    l2_corrupt: AtomicU64,

    // L2 writes
    l2_writes_ok: AtomicU64,
    l2_writes_failed: AtomicU64,

    // L3
    l3_fetches: AtomicU64,
    l3_failures: AtomicU64,

    // Coalescing
    coalesced_waits: AtomicU64,
    coalesced_hits: AtomicU64,

    // Background refresh
    refreshes_scheduled: AtomicU64,
    refreshes_skipped: AtomicU64,
    refreshes_completed: AtomicU64,
    refreshes_failed: AtomicU64,

    // Latencies (microseconds, exponential moving average)
    l2_read_latency_us: AtomicU64,
    l2_write_latency_us: AtomicU64,
    l3_fetch_latency_us: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    // L1 metrics
    pub fn record_l1_hit(&self) {
        self.l1_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l1_miss(&self) {
        self.l1_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_l1_entries(&self, entries: u64) {
        self.l1_entries.store(entries, Ordering::Relaxed);
    }

    pub fn l1_hits(&self) -> u64 {
        self.l1_hits.load(Ordering::Relaxed)
    }

    pub fn l1_misses(&self) -> u64 {
        self.l1_misses.load(Ordering::Relaxed)
    }

    pub fn l1_hit_ratio(&self) -> f64 {
        ratio(self.l1_hits(), self.l1_misses())
    }

    // L2 metrics

    /// Count one L2 read by how it resolved
    pub fn record_l2_read(&self, outcome: ReadOutcome, verdict: StalenessVerdict) {
        let counter = match (outcome, verdict) {
            (ReadOutcome::Hit, StalenessVerdict::Stale) => &self.l2_stale,
            (ReadOutcome::Hit, _) => &self.l2_fresh,
            (ReadOutcome::Expired, _) => &self.l2_expired,
            (ReadOutcome::Absent, _) | (ReadOutcome::Disabled, _) => &self.l2_misses,
            (ReadOutcome::Unavailable, _) => &self.l2_errors,
            (ReadOutcome::Corrupt, _) => &self.l2_corrupt,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_write(&self, ok: bool) {
        if ok {
            self.l2_writes_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.l2_writes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn l2_fresh(&self) -> u64 {
        self.l2_fresh.load(Ordering::Relaxed)
    }

    pub fn l2_stale(&self) -> u64 {
        self.l2_stale.load(Ordering::Relaxed)
    }

    pub fn l2_hits(&self) -> u64 {
        self.l2_fresh() + self.l2_stale()
    }

    pub fn l2_misses(&self) -> u64 {
        self.l2_misses.load(Ordering::Relaxed)
            + self.l2_expired.load(Ordering::Relaxed)
            + self.l2_errors.load(Ordering::Relaxed)
            + self.l2_corrupt.load(Ordering::Relaxed)
    }

    pub fn l2_hit_ratio(&self) -> f64 {
        ratio(self.l2_hits(), self.l2_misses())
    }

    // L3 metrics
    pub fn record_l3_fetch(&self, ok: bool) {
        self.l3_fetches.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.l3_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn l3_fetches(&self) -> u64 {
        self.l3_fetches.load(Ordering::Relaxed)
    }

    pub fn l3_failures(&self) -> u64 {
        self.l3_failures.load(Ordering::Relaxed)
    }

    // Coalescing
    pub fn record_coalesced_wait(&self) {
        self.coalesced_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced_hit(&self) {
        self.coalesced_hits.fetch_add(1, Ordering::Relaxed);
    }

    // Background refresh
    pub fn record_refresh_scheduled(&self) {
        self.refreshes_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_skipped(&self) {
        self.refreshes_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_done(&self, ok: bool) {
        if ok {
            self.refreshes_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.refreshes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    // Latency tracking
    pub fn record_l2_read_latency(&self, duration: Duration) {
        update_latency_ema(&self.l2_read_latency_us, duration);
    }

    pub fn record_l2_write_latency(&self, duration: Duration) {
        update_latency_ema(&self.l2_write_latency_us, duration);
    }

    pub fn record_l3_fetch_latency(&self, duration: Duration) {
        update_latency_ema(&self.l3_fetch_latency_us, duration);
    }

    pub fn l2_read_latency(&self) -> Duration {
        Duration::from_micros(self.l2_read_latency_us.load(Ordering::Relaxed))
    }

    pub fn l2_write_latency(&self) -> Duration {
        Duration::from_micros(self.l2_write_latency_us.load(Ordering::Relaxed))
    }

    pub fn l3_fetch_latency(&self) -> Duration {
        Duration::from_micros(self.l3_fetch_latency_us.load(Ordering::Relaxed))
    }

    /// Share of lookups answered without going upstream
    pub fn overall_hit_ratio(&self) -> f64 {
        let served = self.l1_hits() + self.l2_hits() + self.coalesced_hits.load(Ordering::Relaxed);
        ratio(served, self.l3_fetches())
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            l1_hits: self.l1_hits(),
            l1_misses: self.l1_misses(),
            l1_entries: load(&self.l1_entries),
            l1_hit_ratio: self.l1_hit_ratio(),

            l2_fresh: load(&self.l2_fresh),
            l2_stale: load(&self.l2_stale),
            l2_expired: load(&self.l2_expired),
            l2_misses: load(&self.l2_misses),
            l2_errors: load(&self.l2_errors),
            l2_corrupt: load(&self.l2_corrupt),
            l2_hit_ratio: self.l2_hit_ratio(),
            l2_writes_ok: load(&self.l2_writes_ok),
            l2_writes_failed: load(&self.l2_writes_failed),
            l2_read_latency: self.l2_read_latency(),
            l2_write_latency: self.l2_write_latency(),

            l3_fetches: self.l3_fetches(),
            l3_failures: self.l3_failures(),
            l3_fetch_latency: self.l3_fetch_latency(),

            coalesced_waits: load(&self.coalesced_waits),
            coalesced_hits: load(&self.coalesced_hits),

            refreshes_scheduled: load(&self.refreshes_scheduled),
            refreshes_skipped: load(&self.refreshes_skipped),
            refreshes_completed: load(&self.refreshes_completed),
            refreshes_failed: load(&self.refreshes_failed),

            overall_hit_ratio: self.overall_hit_ratio(),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        for counter in [
            &self.l1_hits,
            &self.l1_misses,
            &self.l2_fresh,
            &self.l2_stale,
            &self.l2_expired,
            &self.l2_misses,
            &self.l2_errors,
            &self.l2_corrupt,
            &self.l2_writes_ok,
            &self.l2_writes_failed,
            &self.l3_fetches,
            &self.l3_failures,
            &self.coalesced_waits,
            &self.coalesced_hits,
            &self.refreshes_scheduled,
            &self.refreshes_skipped,
            &self.refreshes_completed,
            &self.refreshes_failed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Render the current values in Prometheus text format
    pub fn render_prometheus(&self) -> Result<String> {
        self.snapshot().render_prometheus()
    }
}

fn ratio(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

fn update_latency_ema(target: &AtomicU64, duration: Duration) {
    let new_us = duration.as_micros() as u64;
    let alpha = 0.1;

    loop {
        let current = target.load(Ordering::Relaxed);
        let updated = if current == 0 {
            new_us
        } else {
            ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
        };

        if target
            .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            break;
        }
    }
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    // L1
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l1_entries: u64,
    pub l1_hit_ratio: f64,

    // L2
    pub l2_fresh: u64,
    pub l2_stale: u64,
    pub l2_expired: u64,
    pub l2_misses: u64,
    pub l2_errors: u64,
    pub l2_corrupt: u64,
    pub l2_hit_ratio: f64,
    pub l2_writes_ok: u64,
    pub l2_writes_failed: u64,
    pub l2_read_latency: Duration,
    pub l2_write_latency: Duration,

    // L3
    pub l3_fetches: u64,
    pub l3_failures: u64,
    pub l3_fetch_latency: Duration,

    // Coalescing
    pub coalesced_waits: u64,
    pub coalesced_hits: u64,

    // Refresh
    pub refreshes_scheduled: u64,
    pub refreshes_skipped: u64,
    pub refreshes_completed: u64,
    pub refreshes_failed: u64,

    pub overall_hit_ratio: f64,
}

impl MetricsSnapshot {
    /// Render in Prometheus text exposition format
    pub fn render_prometheus(&self) -> Result<String> {
        let registry = Registry::new_custom(Some("quotecache".to_string()), None)
            .map_err(prom_err)?;

        let lookups = IntCounterVec::new(
            Opts::new("lookups_total", "Cache lookups by tier and outcome"),
            &["tier", "outcome"],
        )
        .map_err(prom_err)?;
        registry.register(Box::new(lookups.clone())).map_err(prom_err)?;

        for (tier, outcome, value) in [
            ("l1", "hit", self.l1_hits),
            ("l1", "miss", self.l1_misses),
            ("l2", "fresh", self.l2_fresh),
            ("l2", "stale", self.l2_stale),
            ("l2", "expired", self.l2_expired),
            ("l2", "miss", self.l2_misses),
            ("l2", "error", self.l2_errors),
            ("l2", "corrupt", self.l2_corrupt),
            ("l3", "fetch", self.l3_fetches),
            ("l3", "failure", self.l3_failures),
            ("coalesced", "wait", self.coalesced_waits),
            ("coalesced", "hit", self.coalesced_hits),
        ] {
            lookups.with_label_values(&[tier, outcome]).inc_by(value);
        }

        let writes = IntCounterVec::new(
            Opts::new("l2_writes_total", "Shared tier writes by result"),
            &["result"],
        )
        .map_err(prom_err)?;
        registry.register(Box::new(writes.clone())).map_err(prom_err)?;
        writes.with_label_values(&["ok"]).inc_by(self.l2_writes_ok);
        writes.with_label_values(&["failed"]).inc_by(self.l2_writes_failed);

        let refreshes = IntCounterVec::new(
            Opts::new("refreshes_total", "Background refreshes by state"),
            &["state"],
        )
        .map_err(prom_err)?;
        registry.register(Box::new(refreshes.clone())).map_err(prom_err)?;
        for (state, value) in [
            ("scheduled", self.refreshes_scheduled),
            ("skipped", self.refreshes_skipped),
            ("completed", self.refreshes_completed),
            ("failed", self.refreshes_failed),
        ] {
            refreshes.with_label_values(&[state]).inc_by(value);
        }

        for (name, help, value) in [
            ("l1_entries", "Entries held in L1", self.l1_entries as f64),
            ("hit_ratio", "Lookups served without an upstream fetch", self.overall_hit_ratio),
            (
                "l2_read_latency_seconds",
                "Shared tier read latency (EMA)",
                self.l2_read_latency.as_secs_f64(),
            ),
            (
                "l2_write_latency_seconds",
                "Shared tier write latency (EMA)",
                self.l2_write_latency.as_secs_f64(),
            ),
            (
                "l3_fetch_latency_seconds",
                "Upstream fetch latency (EMA)",
                self.l3_fetch_latency.as_secs_f64(),
            ),
        ] {
            let gauge = Gauge::new(name, help).map_err(prom_err)?;
            gauge.set(value);
            registry.register(Box::new(gauge)).map_err(prom_err)?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .map_err(prom_err)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

fn prom_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("Prometheus encoding failed: {}", e))
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.l1_hits(), 0);
        assert_eq!(metrics.l2_hits(), 0);
        assert_eq!(metrics.l3_fetches(), 0);
    }

    #[test]
    fn test_hit_tracking() {
        let metrics = CacheMetrics::new();

        metrics.record_l1_hit();
        metrics.record_l1_hit();
        metrics.record_l1_miss();

        assert_eq!(metrics.l1_hits(), 2);
        assert_eq!(metrics.l1_misses(), 1);
        assert!((metrics.l1_hit_ratio() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_l2_read_classification() {
        let metrics = CacheMetrics::new();

        metrics.record_l2_read(ReadOutcome::Hit, StalenessVerdict::Fresh);
        metrics.record_l2_read(ReadOutcome::Hit, StalenessVerdict::Stale);
        metrics.record_l2_read(ReadOutcome::Expired, StalenessVerdict::Expired);
        metrics.record_l2_read(ReadOutcome::Unavailable, StalenessVerdict::Fresh);
        metrics.record_l2_read(ReadOutcome::Corrupt, StalenessVerdict::Fresh);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.l2_fresh, 1);
        assert_eq!(snapshot.l2_stale, 1);
        assert_eq!(snapshot.l2_expired, 1);
        assert_eq!(snapshot.l2_errors, 1);
        assert_eq!(snapshot.l2_corrupt, 1);
        assert_eq!(metrics.l2_hits(), 2);
        assert_eq!(metrics.l2_misses(), 3);
    }

    #[test]
    fn test_latency_tracking() {
        let metrics = CacheMetrics::new();

        metrics.record_l3_fetch_latency(Duration::from_micros(100));
        assert_eq!(metrics.l3_fetch_latency(), Duration::from_micros(100));

        // EMA should smooth values
        metrics.record_l3_fetch_latency(Duration::from_micros(200));
        let latency = metrics.l3_fetch_latency().as_micros();
        assert!(latency > 100 && latency < 200);
    }

    #[test]
    fn test_overall_hit_ratio() {
        let metrics = CacheMetrics::new();

        metrics.record_l1_hit();
        metrics.record_l1_hit();
        metrics.record_l2_read(ReadOutcome::Hit, StalenessVerdict::Fresh);
        metrics.record_coalesced_hit();
        metrics.record_l3_fetch(true);

        assert!((metrics.overall_hit_ratio() - 0.8).abs() < 0.01);
    }

    #[test]
    fn test_reset() {
        let metrics = CacheMetrics::new();

        metrics.record_l1_hit();
        metrics.record_l3_fetch(false);
        metrics.record_refresh_scheduled();

        metrics.reset();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.l1_hits, 0);
        assert_eq!(snapshot.l3_failures, 0);
        assert_eq!(snapshot.refreshes_scheduled, 0);
    }

    #[test]
    fn test_render_prometheus() {
        let metrics = CacheMetrics::new();
        metrics.record_l1_hit();
        metrics.record_l3_fetch(false);
        metrics.record_l2_write(true);
        metrics.update_l1_entries(7);

        let text = metrics.render_prometheus().unwrap();
        assert!(text.contains(r#"quotecache_lookups_total{outcome="hit",tier="l1"} 1"#));
        assert!(text.contains(r#"quotecache_lookups_total{outcome="failure",tier="l3"} 1"#));
        assert!(text.contains(r#"quotecache_l2_writes_total{result="ok"} 1"#));
        assert!(text.contains("quotecache_l1_entries 7"));
    }

    #[test]
    fn test_latency_tracker() {
        let tracker = LatencyTracker::start();
        std::thread::sleep(Duration::from_millis(10));
        assert!(tracker.elapsed() >= Duration::from_millis(10));
    }
}
