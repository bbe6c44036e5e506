//! Progressive window index integration tests

use chrono::{Duration, NaiveDate};

use quotecache::index::{
    BasketPrice, IndicatorSnapshot, ProgressiveWindowIndex, SnapshotStore, WindowIndexConfig,
};

const MEMBERS: usize = 10;

fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 1).unwrap() + Duration::days(offset)
}

/// Linear path from `start` to `start * (1 + growth)` over `days`
fn price_at(start: f64, growth: f64, offset: i64, days: i64) -> f64 {
    start * (1.0 + growth * offset as f64 / days as f64)
}

/// Reference +10%; the first six members +20%, the rest +5%
fn snapshot(offset: i64, days: i64) -> IndicatorSnapshot {
    let basket = (0..MEMBERS)
        .map(|i| {
            let growth = if i < 6 { 0.20 } else { 0.05 };
            BasketPrice::new(format!("alt-{i}"), price_at(10.0 + i as f64, growth, offset, days))
        })
        .chain(std::iter::once(BasketPrice::new(
            "bitcoin",
            price_at(60_000.0, 0.10, offset, days),
        )))
        .collect();

    IndicatorSnapshot::new(day(offset), price_at(60_000.0, 0.10, offset, days), basket)
}

#[test]
fn test_thirty_five_days_of_history() {
    let index = ProgressiveWindowIndex::new(WindowIndexConfig::default());
    for offset in 0..35 {
        assert!(index.record_snapshot(snapshot(offset, 34)));
    }

    let result = index.compute_best_index_at(day(34)).unwrap();
    assert!((result.index - 60.0).abs() < 1e-9);
    assert!(!result.is_reference_season);
    assert_eq!(result.calculation_window_days, 34);
    assert_eq!(result.baseline_date, day(0));
    assert_eq!(result.current_date, day(34));
    assert_eq!(result.eligible, MEMBERS);
    assert_eq!(result.outperforming, 6);
    assert!((result.reference_change_pct - 10.0).abs() < 1e-6);
}

#[test]
fn test_window_grows_until_capped() {
    let index = ProgressiveWindowIndex::new(WindowIndexConfig::default());
    for offset in 0..120 {
        index.record_snapshot(snapshot(offset, 119));
    }

    assert!(index.compute_best_index_at(day(30)).is_none());
    assert_eq!(index.compute_best_index_at(day(31)).unwrap().calculation_window_days, 31);
    assert_eq!(index.compute_best_index_at(day(60)).unwrap().calculation_window_days, 60);
    assert_eq!(index.compute_best_index_at(day(119)).unwrap().calculation_window_days, 90);
}

#[test]
fn test_history_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = WindowIndexConfig {
        storage_path: Some(dir.path().join("altseason.json")),
        ..Default::default()
    };

    {
        let index = ProgressiveWindowIndex::new(config.clone());
        for offset in 0..35 {
            index.record_snapshot(snapshot(offset, 34));
        }
        assert!(index.is_persistent());
    }

    let reloaded = ProgressiveWindowIndex::new(config);
    assert_eq!(reloaded.len(), 35);
    assert!(reloaded.compute_best_index_at(day(34)).is_some());
}

#[test]
fn test_corrupt_file_starts_empty_and_is_rewritten() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("altseason.json");
    std::fs::write(&path, b"{\"snapshots\": [ truncated").unwrap();

    let index = ProgressiveWindowIndex::with_store(
        WindowIndexConfig::default(),
        SnapshotStore::new(&path),
    );
    assert!(index.is_empty());
    assert!(!path.exists());

    assert!(index.record_snapshot(snapshot(0, 34)));
    assert_eq!(SnapshotStore::new(&path).load().len(), 1);
}

#[test]
fn test_same_day_keeps_first_snapshot() {
    let index = ProgressiveWindowIndex::new(WindowIndexConfig::default());
    let first = snapshot(3, 34);
    let mut second = snapshot(3, 34);
    second.reference_price = 1.0;

    assert!(index.record_snapshot(first.clone()));
    assert!(!index.record_snapshot(second));
    assert_eq!(index.snapshots(), vec![first]);
}
