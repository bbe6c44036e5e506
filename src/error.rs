//! Error types for quotecache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the market-data cache
///
/// Only [`Error::Fetch`] ever escapes `TieredCache::get_or_fetch`; the shared
/// tier and persistence variants are absorbed and logged where they occur.
#[derive(Error, Debug)]
pub enum Error {
    /// Upstream (L3) fetch failed
    #[error("Fetch failed for key {key}: {source}")]
    Fetch {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// Shared store not configured or not reachable
    #[error("Shared cache store unavailable: {0}")]
    SharedStoreUnavailable(String),

    /// Shared store connection error
    #[error("Shared cache store connection error: {0}")]
    SharedStoreConnection(#[source] reqwest::Error),

    /// Shared store rejected the request
    #[error("Shared cache store returned {status}: {body}")]
    SharedStoreStatus { status: u16, body: String },

    /// Shared cache row could not be decoded
    #[error("Corrupt shared cache row for key {key}: {reason}")]
    SharedCacheCorrupt { key: String, reason: String },

    /// Snapshot file could not be read or written
    #[error("Snapshot persistence failed: {0}")]
    SnapshotPersistence(String),

    /// Analytics sink rejected a batch
    #[error("Analytics sink error: {0}")]
    AnalyticsSink(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap an upstream failure for `key`
    pub fn fetch(key: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Fetch {
            key: key.into(),
            source: source.into(),
        }
    }

    /// True for failures of the shared tier, which callers never see
    pub fn is_shared_tier(&self) -> bool {
        matches!(
            self,
            Self::SharedStoreUnavailable(_)
                | Self::SharedStoreConnection(_)
                | Self::SharedStoreStatus { .. }
                | Self::SharedCacheCorrupt { .. }
        )
    }
}
