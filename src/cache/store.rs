//! Shared Store Port
//!
//! Row-oriented key/value persistence behind the L2 tier: upsert-on-conflict
//! by key, server-assigned `updated_at`, at most one row per key.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::entry::SharedCacheRow;
use crate::error::{Error, Result};

/// Backing store for the shared tier
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Read the row for `key`, if any
    async fn fetch_row(&self, key: &str) -> Result<Option<SharedCacheRow>>;

    /// Insert or overwrite the row for `key`; the store stamps `updated_at`
    async fn upsert_row(&self, key: &str, value: serde_json::Value, ttl_seconds: i64)
        -> Result<()>;

    /// Check that the store is reachable
    async fn health_check(&self) -> Result<bool>;
}

/// In-process shared store (tests, single-node deployments)
///
/// Uses DashMap so upserts on different keys never contend.
#[derive(Default)]
pub struct InMemorySharedStore {
    rows: DashMap<String, SharedCacheRow>,
    offline: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl InMemorySharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row with an explicit server timestamp
    pub fn insert_row(&self, row: SharedCacheRow) {
        self.rows.insert(row.key.clone(), row);
    }

    /// Seed a raw JSON value aged `age` relative to now
    pub fn insert_aged(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl_seconds: i64,
        age: std::time::Duration,
    ) {
        let updated_at: DateTime<Utc> = Utc::now()
            - chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero());
        self.insert_row(SharedCacheRow {
            key: key.to_string(),
            value,
            updated_at,
            ttl_seconds,
        });
    }

    /// Read a row without going through the async port
    pub fn row(&self, key: &str) -> Option<SharedCacheRow> {
        self.rows.get(key).map(|r| r.clone())
    }

    /// Simulate an outage: every call fails until brought back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(Error::SharedStoreUnavailable("in-memory store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SharedStore for InMemorySharedStore {
    async fn fetch_row(&self, key: &str) -> Result<Option<SharedCacheRow>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.ensure_online()?;
        Ok(self.rows.get(key).map(|r| r.clone()))
    }

    async fn upsert_row(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl_seconds: i64,
    ) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.ensure_online()?;
        self.rows.insert(
            key.to_string(),
            SharedCacheRow {
                key: key.to_string(),
                value,
                updated_at: Utc::now(),
                ttl_seconds,
            },
        );
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.offline.load(Ordering::Relaxed))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_and_fetch() {
        let store = InMemorySharedStore::new();
        store.upsert_row("k", json!({"v": 1}), 60).await.unwrap();
        store.upsert_row("k", json!({"v": 2}), 90).await.unwrap();

        let row = store.fetch_row("k").await.unwrap().unwrap();
        assert_eq!(row.value, json!({"v": 2}));
        assert_eq!(row.ttl_seconds, 90);
        assert_eq!(store.len(), 1);
        assert_eq!(store.writes(), 2);
    }

    #[tokio::test]
    async fn test_missing_row() {
        let store = InMemorySharedStore::new();
        assert!(store.fetch_row("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_server_assigns_timestamp() {
        let store = InMemorySharedStore::new();
        let before = Utc::now();
        store.upsert_row("k", json!(1), 60).await.unwrap();
        let row = store.row("k").unwrap();
        assert!(row.updated_at >= before);
    }

    #[tokio::test]
    async fn test_offline_store_errors() {
        let store = InMemorySharedStore::new();
        store.set_offline(true);

        assert_matches!(
            store.fetch_row("k").await,
            Err(Error::SharedStoreUnavailable(_))
        );
        assert_matches!(
            store.upsert_row("k", json!(1), 60).await,
            Err(Error::SharedStoreUnavailable(_))
        );
        assert!(!store.health_check().await.unwrap());

        store.set_offline(false);
        assert!(store.health_check().await.unwrap());
    }

    #[test]
    fn test_insert_aged() {
        let store = InMemorySharedStore::new();
        store.insert_aged("k", json!(1), 60, std::time::Duration::from_secs(90));
        let row = store.row("k").unwrap();
        let age = row.age_at(Utc::now());
        assert!(age >= std::time::Duration::from_secs(90));
        assert!(age < std::time::Duration::from_secs(100));
    }
}
