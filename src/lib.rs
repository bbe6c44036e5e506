//! quotecache - Tiered Market Data Cache and Indicator Engine
//!
//! Caching and derived-indicator plumbing for market-data dashboards that
//! poll rate-limited upstream APIs.
//!
//! # Architecture
//!
//! ```text
//! caller ──► TieredCache ──► L1 LocalCache ──► L2 SharedStore ──► L3 fetch
//!                 │
//!                 └── TaskSupervisor (stale refresh, L2 writes, analytics flush)
//!
//! CompositeScoreEngine ◄── normalized signals (SentimentComposite)
//! ProgressiveWindowIndex ◄── daily IndicatorSnapshots (persisted JSON)
//! AnalyticsBuffer ──► AnalyticsSink (batched)
//! ```
//!
//! # Modules
//!
//! - [`analytics`] - Bounded event buffer with batched delivery
//! - [`cache`] - L1/L2/L3 stale-while-revalidate cache
//! - [`config`] - YAML and environment configuration
//! - [`error`] - Error types
//! - [`index`] - Progressive window outperformance index
//! - [`scoring`] - Weighted composite scores
//! - [`telemetry`] - Logging setup

pub mod analytics;
pub mod cache;
pub mod config;
pub mod error;
pub mod index;
pub mod scoring;
pub mod telemetry;

// Re-export commonly used types
pub use analytics::{AnalyticsBuffer, AnalyticsConfig, AnalyticsEvent, AnalyticsSink};
pub use cache::{
    CacheKey, InMemorySharedStore, RestSharedStore, SharedStore, StalenessPolicy, TaskSupervisor,
    TieredCache,
};
pub use config::QuoteCacheConfig;
pub use error::{Error, Result};
pub use index::{IndicatorSnapshot, ProgressiveWindowIndex, WindowIndex};
pub use scoring::{CompositeComponent, CompositeScore, SentimentComposite};
pub use telemetry::init_logging;

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
