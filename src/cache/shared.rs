//! L2 Cache - Shared Network Tier
//!
//! Wraps an optional [`SharedStore`] with staleness classification and
//! best-effort writes. Nothing in here returns an error to the caller: an
//! unconfigured, unreachable or corrupt tier reads as a miss and a failed
//! write is logged.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::entry::StalenessVerdict;
use super::key::CacheKey;
use super::store::SharedStore;
use super::DEFAULT_EXPIRY_MULTIPLIER;
use crate::error::{Error, Result};

/// When a stale row stops being served
///
/// A row is stale past its ttl and expired past `multiplier x ttl`. The
/// multiplier can be overridden per key prefix (longest prefix wins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessPolicy {
    pub expiry_multiplier: f64,
    pub overrides: BTreeMap<String, f64>,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            expiry_multiplier: DEFAULT_EXPIRY_MULTIPLIER,
            overrides: BTreeMap::new(),
        }
    }
}

impl StalenessPolicy {
    /// Uniform multiplier; must be finite and at least 1
    pub fn new(expiry_multiplier: f64) -> Result<Self> {
        check_multiplier("staleness.expiry_multiplier", expiry_multiplier)?;
        Ok(Self {
            expiry_multiplier,
            overrides: BTreeMap::new(),
        })
    }

    /// Override the multiplier for keys starting with `prefix`
    pub fn with_override(mut self, prefix: impl Into<String>, multiplier: f64) -> Result<Self> {
        let prefix = prefix.into();
        check_multiplier(&format!("staleness override for '{}'", prefix), multiplier)?;
        self.overrides.insert(prefix, multiplier);
        Ok(self)
    }

    /// Reject multipliers that are below 1 or not finite
    pub fn validate(&self) -> Result<()> {
        check_multiplier("staleness.expiry_multiplier", self.expiry_multiplier)?;
        for (prefix, multiplier) in &self.overrides {
            check_multiplier(&format!("staleness override for '{}'", prefix), *multiplier)?;
        }
        Ok(())
    }

    /// Multiplier for `key`
    pub fn multiplier_for(&self, key: &str) -> f64 {
        self.overrides
            .iter()
            .filter(|(prefix, _)| key.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, m)| *m)
            .unwrap_or(self.expiry_multiplier)
    }

    /// Classify a row of `age` with `ttl` under this policy
    pub fn classify(&self, key: &str, age: Duration, ttl: Duration) -> StalenessVerdict {
        StalenessVerdict::classify(age, ttl, self.multiplier_for(key))
    }
}

fn check_multiplier(what: &str, multiplier: f64) -> Result<()> {
    if multiplier.is_finite() && multiplier >= 1.0 {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{} must be finite and >= 1.0, got {}",
            what, multiplier
        )))
    }
}

/// Outcome of an L2 read
#[derive(Debug, Clone, PartialEq)]
pub struct SharedRead<T> {
    /// Usable value (always `None` for expired rows)
    pub value: Option<T>,
    pub verdict: StalenessVerdict,
    /// Why the read produced no value, if it did not
    pub outcome: ReadOutcome,
}

/// How an L2 read resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Hit,
    Absent,
    Disabled,
    Unavailable,
    Corrupt,
    Expired,
}

impl<T> SharedRead<T> {
    fn miss(outcome: ReadOutcome) -> Self {
        Self {
            value: None,
            verdict: StalenessVerdict::Fresh,
            outcome,
        }
    }
}

/// Shared tier facade
pub struct SharedCache {
    store: Option<Arc<dyn SharedStore>>,
    policy: StalenessPolicy,
}

impl SharedCache {
    /// Shared tier backed by `store`
    pub fn new(store: Arc<dyn SharedStore>, policy: StalenessPolicy) -> Self {
        Self {
            store: Some(store),
            policy,
        }
    }

    /// Unconfigured tier: every read misses, every write is a no-op
    pub fn disabled() -> Self {
        Self {
            store: None,
            policy: StalenessPolicy::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn policy(&self) -> &StalenessPolicy {
        &self.policy
    }

    /// Read and classify the row for `key`
    #[instrument(skip(self), fields(key = %key))]
    pub async fn read<T: DeserializeOwned>(&self, key: &CacheKey) -> SharedRead<T> {
        let Some(store) = &self.store else {
            return SharedRead::miss(ReadOutcome::Disabled);
        };

        let row = match store.fetch_row(key.as_str()).await {
            Ok(Some(row)) => row,
            Ok(None) => return SharedRead::miss(ReadOutcome::Absent),
            Err(e) => {
                warn!("Shared cache read failed, skipping tier: {}", e);
                return SharedRead::miss(ReadOutcome::Unavailable);
            }
        };

        let ttl = Duration::from_secs(row.ttl_seconds.max(0) as u64);
        let age = row.age_at(Utc::now());
        let verdict = self.policy.classify(key.as_str(), age, ttl);

        if verdict == StalenessVerdict::Expired {
            debug!(?age, ?ttl, "Shared cache row expired");
            return SharedRead {
                value: None,
                verdict,
                outcome: ReadOutcome::Expired,
            };
        }

        match serde_json::from_value::<T>(row.value) {
            Ok(value) => {
                debug!(%verdict, ?age, "Shared cache hit");
                SharedRead {
                    value: Some(value),
                    verdict,
                    outcome: ReadOutcome::Hit,
                }
            }
            Err(e) => {
                warn!("Corrupt shared cache row, treating as miss: {}", e);
                SharedRead::miss(ReadOutcome::Corrupt)
            }
        }
    }

    /// Serialize and upsert `value`; `false` on any failure
    #[instrument(skip(self, value), fields(key = %key))]
    pub async fn write<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl_seconds: i64,
    ) -> bool {
        let Some(store) = &self.store else {
            return false;
        };

        let json = match serde_json::to_value(value) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize value for shared cache: {}", e);
                return false;
            }
        };

        match store.upsert_row(key.as_str(), json, ttl_seconds).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Shared cache write failed: {}", e);
                false
            }
        }
    }

    /// Check the backing store; an unconfigured tier is never healthy
    pub async fn health_check(&self) -> bool {
        match &self.store {
            Some(store) => store.health_check().await.unwrap_or(false),
            None => false,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
