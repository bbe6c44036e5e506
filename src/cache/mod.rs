//! Three-Tiered Market Data Cache
//!
//! Stale-while-revalidate caching with L1 (process), L2 (shared store) and
//! L3 (upstream API) tiers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          TieredCache                                     │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  L1 (LocalCache)       │ L2 (SharedCache)      │ L3 (caller fetch)       │
//! │  ┌──────────────────┐  │ ┌──────────────────┐  │ ┌────────────────────┐  │
//! │  │ ShardedMap       │  │ │ SharedStore port │  │ │ async closure      │  │
//! │  │ Arc<dyn Any>     │  │ │ JSON rows        │  │ │ anyhow::Result<T>  │  │
//! │  │ per-entry TTL    │  │ │ server timestamp │  │ │                    │  │
//! │  └──────────────────┘  │ └──────────────────┘  │ └────────────────────┘  │
//! │           │            │          │            │           │             │
//! │           └────────────┴──────────┴────────────┴───────────┘             │
//! │                                  │                                       │
//! │             Coalescing locks + TaskSupervisor (refresh / L2 write)       │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Read path
//!
//! 1. L1 hit returns immediately
//! 2. Concurrent misses for one key wait on a single in-flight lock
//! 3. Fresh or stale L2 rows populate L1; stale rows schedule one refresh
//! 4. Otherwise fetch, populate L1, write L2 in the background
//!
//! Shared-tier failures never reach the caller.

mod entry;
mod key;
mod local;
mod metrics;
mod rest;
mod shard;
mod shared;
mod store;
mod tasks;
mod tiered;

pub use entry::{LocalEntry, SharedCacheRow, StalenessVerdict};
pub use key::{CacheKey, CacheKeyBuilder};
pub use local::{LocalCache, LocalCacheConfig};
pub use metrics::{CacheMetrics, LatencyTracker, MetricsSnapshot};
pub use rest::{RestSharedStore, RestStoreConfig};
pub use shard::{Shard, ShardedMap};
pub use shared::{ReadOutcome, SharedCache, SharedRead, StalenessPolicy};
pub use store::{InMemorySharedStore, SharedStore};
pub use tasks::{BackgroundConfig, TaskSupervisor};
pub use tiered::TieredCache;

/// Default number of L1 shards
pub const DEFAULT_SHARD_COUNT: usize = 64;

/// Stale rows are served up to this multiple of their TTL
pub const DEFAULT_EXPIRY_MULTIPLIER: f64 = 2.0;

/// Default bound on concurrent background refreshes and L2 writes
pub const DEFAULT_MAX_BACKGROUND_TASKS: usize = 16;

// =============================================================================
// Tests
// =============================================================================
