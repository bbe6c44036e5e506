//! Indicator Snapshots and Persistence
//!
//! Daily snapshots are kept in a JSON document `{ snapshots, last_updated }`.
//! Writes go to a sibling temp file that is then renamed over the target, so
//! readers never observe a partial file. A file that fails to parse is
//! deleted and the index starts empty.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// Price of one basket member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketPrice {
    pub asset_id: String,
    pub price: f64,
}

impl BasketPrice {
    pub fn new(asset_id: impl Into<String>, price: f64) -> Self {
        Self {
            asset_id: asset_id.into(),
            price,
        }
    }

    /// Finite and strictly positive
    pub fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

/// Daily record of the reference asset and basket prices (UTC calendar day)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub date: NaiveDate,
    pub reference_price: f64,
    pub basket: Vec<BasketPrice>,
}

impl IndicatorSnapshot {
    pub fn new(date: NaiveDate, reference_price: f64, basket: Vec<BasketPrice>) -> Self {
        Self {
            date,
            reference_price,
            basket,
        }
    }

    /// Price of `asset_id`, if listed
    pub fn price_of(&self, asset_id: &str) -> Option<f64> {
        self.basket
            .iter()
            .find(|b| b.asset_id == asset_id)
            .map(|b| b.price)
    }
}

/// On-disk document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub snapshots: Vec<IndicatorSnapshot>,
    pub last_updated: DateTime<Utc>,
}

/// File-backed snapshot persistence
///
/// After the first failed write the store stops touching disk for the rest
/// of the process lifetime.
#[derive(Debug)]
pub struct SnapshotStore {
    path: Option<PathBuf>,
    enabled: AtomicBool,
}

impl SnapshotStore {
    /// Persist to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            enabled: AtomicBool::new(true),
        }
    }

    /// No persistence
    pub fn memory() -> Self {
        Self {
            path: None,
            enabled: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// True while writes still reach disk
    pub fn is_persistent(&self) -> bool {
        self.path.is_some() && self.enabled.load(Ordering::Relaxed)
    }

    /// Load saved snapshots; missing, unreadable or corrupt files yield empty
    pub fn load(&self) -> Vec<IndicatorSnapshot> {
        let Some(path) = &self.path else {
            return Vec::new();
        };

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No snapshot file yet");
                return Vec::new();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read snapshot file");
                return Vec::new();
            }
        };

        match serde_json::from_slice::<SnapshotFile>(&bytes) {
            Ok(file) => {
                info!(
                    path = %path.display(),
                    snapshots = file.snapshots.len(),
                    last_updated = %file.last_updated,
                    "Loaded indicator snapshots"
                );
                file.snapshots
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt snapshot file, discarding");
                if let Err(e) = std::fs::remove_file(path) {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to remove corrupt snapshot file"
                    );
                }
                Vec::new()
            }
        }
    }

    /// Atomically replace the file; failures disable further writes
    pub fn save(&self, snapshots: &[IndicatorSnapshot]) {
        if !self.is_persistent() {
            return;
        }
        let Some(path) = &self.path else {
            return;
        };

        if let Err(e) = write_atomic(path, snapshots) {
            error!(
                path = %path.display(),
                error = %e,
                "Snapshot persistence failed, continuing in memory only"
            );
            self.enabled.store(false, Ordering::Relaxed);
        }
    }
}

fn write_atomic(path: &Path, snapshots: &[IndicatorSnapshot]) -> Result<()> {
    let document = SnapshotFile {
        snapshots: snapshots.to_vec(),
        last_updated: Utc::now(),
    };
    let json = serde_json::to_vec_pretty(&document)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            Error::SnapshotPersistence(format!("create {}: {}", parent.display(), e))
        })?;
    }

    let temp_path = path.with_extension("json.tmp");
    std::fs::write(&temp_path, json).map_err(|e| {
        Error::SnapshotPersistence(format!("write {}: {}", temp_path.display(), e))
    })?;
    std::fs::rename(&temp_path, path).map_err(|e| {
        Error::SnapshotPersistence(format!("rename to {}: {}", path.display(), e))
    })?;

    debug!(path = %path.display(), snapshots = snapshots.len(), "Saved indicator snapshots");
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
