//! Progressive Window Index
//!
//! Accumulates one [`IndicatorSnapshot`] per day and computes how many basket
//! members outperformed the reference asset over the longest lookback the
//! local history supports (capped at `max_window_days`). Until the history
//! spans more than `min_local_days` no index is produced, since the
//! externally available default window already covers that period.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use chrono::{Duration, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::snapshot::{IndicatorSnapshot, SnapshotStore};
use crate::error::{Error, Result};

/// Window index configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindowIndexConfig {
    /// Snapshots kept (oldest evicted first)
    pub max_snapshots: usize,
    /// History span required before an index is computed
    pub min_local_days: i64,
    /// Longest lookback used
    pub max_window_days: i64,
    /// Index below this is reference season
    pub basket_season_threshold: f64,
    /// Asset excluded from the basket comparison
    pub reference_asset_id: String,
    /// Snapshot file; `None` keeps snapshots in memory only
    pub storage_path: Option<PathBuf>,
}

impl Default for WindowIndexConfig {
    fn default() -> Self {
        Self {
            max_snapshots: 120,
            min_local_days: 30,
            max_window_days: 90,
            basket_season_threshold: 50.0,
            reference_asset_id: "bitcoin".to_string(),
            storage_path: None,
        }
    }
}

impl WindowIndexConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_snapshots == 0 {
            return Err(Error::Config("index.max_snapshots must be at least 1".into()));
        }
        if self.min_local_days < 0 {
            return Err(Error::Config("index.min_local_days must not be negative".into()));
        }
        if self.max_window_days <= self.min_local_days {
            return Err(Error::Config(format!(
                "index.max_window_days ({}) must exceed index.min_local_days ({})",
                self.max_window_days, self.min_local_days
            )));
        }
        if !(0.0..=100.0).contains(&self.basket_season_threshold) {
            return Err(Error::Config(
                "index.basket_season_threshold must be within 0..=100".into(),
            ));
        }
        Ok(())
    }
}

/// Computed index over the best available window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowIndex {
    /// Share of eligible members that beat the reference, 0-100
    pub index: f64,
    /// Lookback actually used
    pub calculation_window_days: i64,
    pub baseline_date: NaiveDate,
    pub current_date: NaiveDate,
    pub reference_change_pct: f64,
    pub outperforming: usize,
    pub eligible: usize,
    /// Index below the basket season threshold
    pub is_reference_season: bool,
}

/// Bounded, persisted snapshot history with windowed index computation
#[derive(Debug)]
pub struct ProgressiveWindowIndex {
    config: WindowIndexConfig,
    snapshots: RwLock<Vec<IndicatorSnapshot>>,
    store: SnapshotStore,
    /// Serializes writes to the store so the last one carries the latest history
    persist: Mutex<()>,
}

impl ProgressiveWindowIndex {
    /// Create and load any persisted snapshots
    pub fn new(config: WindowIndexConfig) -> Self {
        let store = match &config.storage_path {
            Some(path) => SnapshotStore::new(path.clone()),
            None => SnapshotStore::memory(),
        };
        Self::with_store(config, store)
    }

    /// Create over an explicit store
    pub fn with_store(config: WindowIndexConfig, store: SnapshotStore) -> Self {
        let mut snapshots = store.load();
        normalize(&mut snapshots, config.max_snapshots);
        info!(
            snapshots = snapshots.len(),
            persistent = store.is_persistent(),
            "Progressive window index ready"
        );

        Self {
            config,
            snapshots: RwLock::new(snapshots),
            store,
            persist: Mutex::new(()),
        }
    }

    /// Insert a snapshot unless one already exists for its date
    ///
    /// Returns false for a duplicate day, or when the history is full and the
    /// snapshot is older than everything retained. The history is truncated to
    /// the most recent `max_snapshots` and persisted after every insert.
    pub fn record_snapshot(&self, snapshot: IndicatorSnapshot) -> bool {
        let date = snapshot.date;
        let total = {
            let mut snapshots = self.snapshots.write();

            let position = match snapshots.binary_search_by_key(&date, |s| s.date) {
                Ok(_) => {
                    debug!(%date, "Snapshot for this date already recorded");
                    return false;
                }
                Err(position) => position,
            };

            let excess = (snapshots.len() + 1).saturating_sub(self.config.max_snapshots);
            if position < excess {
                debug!(%date, "Snapshot older than the retained history, dropping");
                return false;
            }

            snapshots.insert(position, snapshot);
            snapshots.drain(..excess);
            snapshots.len()
        };

        self.persist();
        debug!(%date, total, "Recorded indicator snapshot");
        true
    }

    fn persist(&self) {
        if !self.store.is_persistent() {
            return;
        }
        let _persist = self.persist.lock();
        let snapshots = self.snapshots.read().clone();
        self.store.save(&snapshots);
    }

    /// Copy of the history, oldest first
    pub fn snapshots(&self) -> Vec<IndicatorSnapshot> {
        self.snapshots.read().clone()
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }

    pub fn config(&self) -> &WindowIndexConfig {
        &self.config
    }

    /// True while snapshots are still being written to disk
    pub fn is_persistent(&self) -> bool {
        self.store.is_persistent()
    }

    /// Days between the earliest snapshot and `today`
    pub fn available_span_days(&self, today: NaiveDate) -> Option<i64> {
        self.snapshots
            .read()
            .first()
            .map(|s| (today - s.date).num_days())
    }

    /// Index as of the current UTC date
    pub fn compute_best_index(&self) -> Option<WindowIndex> {
        self.compute_best_index_at(Utc::now().date_naive())
    }

    /// Index as of `today`
    pub fn compute_best_index_at(&self, today: NaiveDate) -> Option<WindowIndex> {
        let snapshots = self.snapshots.read();
        let earliest = snapshots.first()?;
        let current = snapshots.last()?;

        let span = (today - earliest.date).num_days();
        if span <= self.config.min_local_days {
            debug!(span, min = self.config.min_local_days, "Not enough local history");
            return None;
        }

        let window = span.min(self.config.max_window_days);
        let target = today - Duration::days(window);
        let baseline = baseline_for(&snapshots, target)?;
        if baseline.date >= current.date {
            return None;
        }

        let reference_change = pct_change(baseline.reference_price, current.reference_price)?;

        let baseline_prices: HashMap<&str, f64> = baseline
            .basket
            .iter()
            .filter(|b| b.is_valid())
            .map(|b| (b.asset_id.as_str(), b.price))
            .collect();

        let mut seen = HashSet::new();
        let mut eligible = 0usize;
        let mut outperforming = 0usize;
        for member in &current.basket {
            if member.asset_id == self.config.reference_asset_id
                || !member.is_valid()
                || !seen.insert(member.asset_id.as_str())
            {
                continue;
            }
            let Some(&base) = baseline_prices.get(member.asset_id.as_str()) else {
                continue;
            };
            let Some(change) = pct_change(base, member.price) else {
                continue;
            };

            eligible += 1;
            if change > reference_change {
                outperforming += 1;
            }
        }

        if eligible == 0 {
            debug!("No basket members with a usable baseline");
            return None;
        }

        let index = outperforming as f64 / eligible as f64 * 100.0;
        Some(WindowIndex {
            index,
            calculation_window_days: window,
            baseline_date: baseline.date,
            current_date: current.date,
            reference_change_pct: reference_change,
            outperforming,
            eligible,
            is_reference_season: index < self.config.basket_season_threshold,
        })
    }
}

/// Exact match for `target`, else the nearest earlier snapshot
fn baseline_for(snapshots: &[IndicatorSnapshot], target: NaiveDate) -> Option<&IndicatorSnapshot> {
    match snapshots.binary_search_by_key(&target, |s| s.date) {
        Ok(i) => snapshots.get(i),
        Err(0) => None,
        Err(i) => snapshots.get(i - 1),
    }
}

fn pct_change(from: f64, to: f64) -> Option<f64> {
    if !(from.is_finite() && to.is_finite()) || from <= 0.0 || to <= 0.0 {
        return None;
    }
    Some((to - from) / from * 100.0)
}

/// Sort by date, keep the first entry per day, keep the newest `max`
fn normalize(snapshots: &mut Vec<IndicatorSnapshot>, max: usize) {
    snapshots.sort_by_key(|s| s.date);
    snapshots.dedup_by_key(|s| s.date);
    let excess = snapshots.len().saturating_sub(max);
    if excess > 0 {
        snapshots.drain(..excess);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::snapshot::BasketPrice;

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap() + Duration::days(n)
    }

    fn flat(n: i64, reference: f64, basket: &[(&str, f64)]) -> IndicatorSnapshot {
        IndicatorSnapshot::new(
            day(n),
            reference,
            basket
                .iter()
                .map(|(id, p)| BasketPrice::new(*id, *p))
                .collect(),
        )
    }

    fn memory_index() -> ProgressiveWindowIndex {
        ProgressiveWindowIndex::new(WindowIndexConfig::default())
    }

    #[test]
    fn test_duplicate_day_keeps_first() {
        let index = memory_index();
        assert!(index.record_snapshot(flat(0, 100.0, &[("eth", 1.0)])));
        assert!(!index.record_snapshot(flat(0, 999.0, &[("eth", 9.0)])));

        let snapshots = index.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].reference_price, 100.0);
    }

    #[test]
    fn test_out_of_order_inserts_stay_sorted() {
        let index = memory_index();
        for n in [5, 1, 3, 2, 4] {
            index.record_snapshot(flat(n, 100.0, &[]));
        }
        let dates: Vec<_> = index.snapshots().iter().map(|s| s.date).collect();
        assert_eq!(dates, (1..=5).map(day).collect::<Vec<_>>());
    }

    #[test]
    fn test_history_is_bounded() {
        let index = ProgressiveWindowIndex::new(WindowIndexConfig {
            max_snapshots: 10,
            ..Default::default()
        });
        for n in 0..25 {
            index.record_snapshot(flat(n, 100.0, &[]));
        }
        let snapshots = index.snapshots();
        assert_eq!(snapshots.len(), 10);
        assert_eq!(snapshots[0].date, day(15));
        assert_eq!(snapshots[9].date, day(24));
    }

    #[test]
    fn test_requires_minimum_span() {
        let index = memory_index();
        for n in 0..=30 {
            index.record_snapshot(flat(n, 100.0 + n as f64, &[("eth", 10.0 + n as f64)]));
        }
        // Exactly 30 days of span is not enough
        assert_eq!(index.available_span_days(day(30)), Some(30));
        assert!(index.compute_best_index_at(day(30)).is_none());

        index.record_snapshot(flat(31, 131.0, &[("eth", 50.0)]));
        let result = index.compute_best_index_at(day(31)).unwrap();
        assert_eq!(result.calculation_window_days, 31);
        assert_eq!(result.baseline_date, day(0));
    }

    #[test]
    fn test_window_capped_at_max() {
        let index = memory_index();
        for n in 0..120 {
            index.record_snapshot(flat(n, 100.0, &[("eth", 100.0 + n as f64)]));
        }
        let result = index.compute_best_index_at(day(119)).unwrap();
        assert_eq!(result.calculation_window_days, 90);
        assert_eq!(result.baseline_date, day(29));
        assert_eq!(result.current_date, day(119));
    }

    #[test]
    fn test_baseline_falls_back_to_nearest_earlier() {
        let index = memory_index();
        // Gap around the target date (day 9 when today is day 99 with a 90 day window)
        for n in [0, 5, 8, 12, 60, 99] {
            index.record_snapshot(flat(n, 100.0, &[("eth", 100.0 + n as f64)]));
        }
        let result = index.compute_best_index_at(day(99)).unwrap();
        assert_eq!(result.baseline_date, day(8));
    }

    #[test]
    fn test_reference_and_invalid_members_excluded() {
        let index = memory_index();
        index.record_snapshot(flat(
            0,
            100.0,
            &[("bitcoin", 100.0), ("eth", 10.0), ("new", 0.0), ("sol", 5.0)],
        ));
        index.record_snapshot(flat(
            40,
            110.0,
            &[("bitcoin", 110.0), ("eth", 20.0), ("new", 3.0), ("sol", 5.0), ("late", 1.0)],
        ));

        let result = index.compute_best_index_at(day(40)).unwrap();
        assert_eq!(result.eligible, 2);
        assert_eq!(result.outperforming, 1);
        assert_eq!(result.index, 50.0);
        assert!((result.reference_change_pct - 10.0).abs() < 1e-9);
        assert!(!result.is_reference_season);
    }

    #[test]
    fn test_no_eligible_members_is_none() {
        let index = memory_index();
        index.record_snapshot(flat(0, 100.0, &[("bitcoin", 100.0)]));
        index.record_snapshot(flat(40, 110.0, &[("bitcoin", 110.0)]));
        assert!(index.compute_best_index_at(day(40)).is_none());
    }

    #[test]
    fn test_single_snapshot_is_none() {
        let index = memory_index();
        index.record_snapshot(flat(0, 100.0, &[("eth", 1.0)]));
        assert!(index.compute_best_index_at(day(45)).is_none());
    }

    #[test]
    fn test_empty_history_is_none() {
        assert!(memory_index().compute_best_index_at(day(100)).is_none());
    }

    #[test]
    fn test_full_history_rejects_older_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots.json");
        let index = ProgressiveWindowIndex::new(WindowIndexConfig {
            max_snapshots: 3,
            storage_path: Some(path.clone()),
            ..Default::default()
        });
        for n in 5..8 {
            assert!(index.record_snapshot(flat(n, 100.0, &[])));
        }

        std::fs::remove_file(&path).unwrap();
        assert!(!index.record_snapshot(flat(1, 100.0, &[])));
        // Nothing changed, so nothing is rewritten
        assert!(!path.exists());
        assert_eq!(index.snapshots()[0].date, day(5));

        // A newer snapshot still pushes out the oldest
        assert!(index.record_snapshot(flat(8, 100.0, &[])));
        assert!(path.exists());
        let dates: Vec<_> = index.snapshots().iter().map(|s| s.date).collect();
        assert_eq!(dates, vec![day(6), day(7), day(8)]);
    }

    #[test]
    fn test_concurrent_records_persist_latest_history() {
        use std::sync::Arc;
        use std::thread;

        let dir = tempfile::tempdir().unwrap();
        let config = WindowIndexConfig {
            storage_path: Some(dir.path().join("snapshots.json")),
            ..Default::default()
        };
        let index = Arc::new(ProgressiveWindowIndex::new(config.clone()));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let index = Arc::clone(&index);
                thread::spawn(move || {
                    for n in 0..10 {
                        assert!(index.record_snapshot(flat(t * 10 + n, 100.0, &[])));
                        // Readers are not blocked by the file write
                        assert!(!index.snapshots().is_empty());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let reloaded = ProgressiveWindowIndex::new(config);
        assert_eq!(reloaded.snapshots(), index.snapshots());
        assert_eq!(reloaded.len(), 40);
    }

    #[test]
    fn test_persisted_history_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let config = WindowIndexConfig {
            storage_path: Some(dir.path().join("snapshots.json")),
            ..Default::default()
        };

        let index = ProgressiveWindowIndex::new(config.clone());
        index.record_snapshot(flat(0, 100.0, &[("eth", 1.0)]));
        index.record_snapshot(flat(1, 101.0, &[("eth", 1.1)]));
        assert!(index.is_persistent());
        drop(index);

        let reloaded = ProgressiveWindowIndex::new(config);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.snapshots()[1].reference_price, 101.0);
    }

    #[test]
    fn test_config_validation() {
        assert!(WindowIndexConfig::default().validate().is_ok());
        let bad = WindowIndexConfig {
            max_window_days: 20,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
