//! Cache Entry Types
//!
//! Entries owned by each tier: type-erased values in L1, JSON rows in L2.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// L1 entry holding a type-erased value
#[derive(Clone)]
pub struct LocalEntry {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
    stored_at: Instant,
    ttl: Duration,
}

impl LocalEntry {
    /// Wrap `value` with a TTL starting now
    pub fn new<T: Any + Send + Sync>(value: T, ttl: Duration) -> Self {
        Self {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
            stored_at: Instant::now(),
            ttl,
        }
    }

    /// Borrow the value if it was stored as `T`
    #[inline]
    pub fn downcast<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Name of the stored type
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Time since the entry was stored
    #[inline]
    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }

    /// When the entry was stored
    #[inline]
    pub fn stored_at(&self) -> Instant {
        self.stored_at
    }

    /// Entry TTL
    #[inline]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// `now - stored_at > ttl`
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.age() > self.ttl
    }
}

impl fmt::Debug for LocalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalEntry")
            .field("type_name", &self.type_name)
            .field("age", &self.age())
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Row persisted by the shared store. `updated_at` is assigned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedCacheRow {
    pub key: String,
    pub value: serde_json::Value,
    pub updated_at: DateTime<Utc>,
    pub ttl_seconds: i64,
}

impl SharedCacheRow {
    /// Age of the row relative to `now`; clock skew never yields a negative age
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.updated_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Freshness of a shared-cache row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalenessVerdict {
    /// age <= ttl
    Fresh,
    /// ttl < age <= multiplier x ttl: serve, then refresh in the background
    Stale,
    /// age > multiplier x ttl: treat as a miss
    Expired,
}

impl StalenessVerdict {
    /// Classify `age` against `ttl` with the given expiry multiplier
    pub fn classify(age: Duration, ttl: Duration, expiry_multiplier: f64) -> Self {
        if age <= ttl {
            return Self::Fresh;
        }
        if ttl.is_zero() {
            return Self::Expired;
        }
        let multiplier = if expiry_multiplier.is_nan() {
            1.0
        } else {
            expiry_multiplier.max(1.0)
        };
        // A limit past what Duration can hold never expires
        match Duration::try_from_secs_f64(ttl.as_secs_f64() * multiplier) {
            Ok(limit) if age > limit => Self::Expired,
            _ => Self::Stale,
        }
    }

    /// Fresh or stale rows are served
    #[inline]
    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::Expired)
    }
}

impl fmt::Display for StalenessVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fresh => write!(f, "fresh"),
            Self::Stale => write!(f, "stale"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
