//! Configuration
//!
//! A single [`QuoteCacheConfig`] covers every component. It can be loaded from
//! YAML, from `QUOTECACHE_*` environment variables, or both (YAML first, then
//! environment overrides). Every field has a default, so an empty document is
//! a valid configuration.
//!
//! ```yaml
//! local:
//!   shard_count: 64
//!   max_entries: 10000
//!   low_watermark: 0.8
//! shared:
//!   url: https://project.example.co
//!   api_key: anon-key
//! staleness:
//!   expiry_multiplier: 2.0
//!   overrides:
//!     "calendar:": 4.0
//! background:
//!   max_concurrent: 16
//! coalesce_misses: true
//! log:
//!   level: info
//!   json: false
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::analytics::AnalyticsConfig;
use crate::cache::{BackgroundConfig, LocalCacheConfig, RestStoreConfig, StalenessPolicy};
use crate::error::{Error, Result};
use crate::index::WindowIndexConfig;
use crate::telemetry::LogConfig;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "QUOTECACHE_";

/// Crate-wide configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuoteCacheConfig {
    /// L1 settings
    pub local: LocalCacheConfig,
    /// L2 REST store; absent means L1 only
    pub shared: Option<RestStoreConfig>,
    /// When stale shared rows stop being served
    pub staleness: StalenessPolicy,
    /// Background refresh / write bounds
    pub background: BackgroundConfig,
    /// Collapse concurrent misses for one key into one lookup
    pub coalesce_misses: bool,
    /// Progressive window index settings
    pub index: WindowIndexConfig,
    /// Analytics buffer settings
    pub analytics: AnalyticsConfig,
    /// Logging
    pub log: LogConfig,
}

impl Default for QuoteCacheConfig {
    fn default() -> Self {
        Self {
            local: LocalCacheConfig::default(),
            shared: None,
            staleness: StalenessPolicy::default(),
            background: BackgroundConfig::default(),
            coalesce_misses: true,
            index: WindowIndexConfig::default(),
            analytics: AnalyticsConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl QuoteCacheConfig {
    /// Parse a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("Invalid YAML configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Defaults overridden by `QUOTECACHE_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup` (called with full variable names)
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, suffix)).filter(|v| !v.trim().is_empty())
        };

        if let Some(url) = var("SHARED_URL") {
            let shared = self
                .shared
                .get_or_insert_with(|| RestStoreConfig::new(url.clone()));
            shared.url = url;
        }
        if let Some(shared) = self.shared.as_mut() {
            if let Some(table) = var("SHARED_TABLE") {
                shared.table = table;
            }
            if let Some(api_key) = var("SHARED_API_KEY") {
                shared.api_key = Some(api_key);
            }
            if let Some(timeout) = var("SHARED_TIMEOUT_SECS") {
                shared.timeout_secs = parse_var("SHARED_TIMEOUT_SECS", &timeout)?;
            }
        }

        if let Some(v) = var("L1_SHARDS") {
            self.local.shard_count = parse_var("L1_SHARDS", &v)?;
        }
        if let Some(v) = var("L1_MAX_ENTRIES") {
            self.local.max_entries = Some(parse_var("L1_MAX_ENTRIES", &v)?);
        }
        if let Some(v) = var("EXPIRY_MULTIPLIER") {
            self.staleness.expiry_multiplier = parse_var("EXPIRY_MULTIPLIER", &v)?;
        }
        if let Some(v) = var("MAX_BACKGROUND_TASKS") {
            self.background.max_concurrent = parse_var("MAX_BACKGROUND_TASKS", &v)?;
        }
        if let Some(v) = var("COALESCE") {
            self.coalesce_misses = parse_bool("COALESCE", &v)?;
        }
        if let Some(v) = var("SNAPSHOT_PATH") {
            self.index.storage_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.log.level = v;
        }
        if let Some(v) = var("LOG_JSON") {
            self.log.json = parse_bool("LOG_JSON", &v)?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject settings no component can run with
    pub fn validate(&self) -> Result<()> {
        if self.local.shard_count == 0 {
            return Err(Error::Config("local.shard_count must be at least 1".into()));
        }
        if self.local.max_entries == Some(0) {
            return Err(Error::Config("local.max_entries must be at least 1".into()));
        }
        let watermark = self.local.low_watermark;
        if !(watermark > 0.0 && watermark < 1.0) {
            return Err(Error::Config(format!(
                "local.low_watermark must be between 0 and 1, got {}",
                watermark
            )));
        }
        self.staleness.validate()?;
        if self.background.max_concurrent == 0 {
            return Err(Error::Config(
                "background.max_concurrent must be at least 1".into(),
            ));
        }
        if let Some(shared) = &self.shared {
            if shared.url.trim().is_empty() {
                return Err(Error::Config("shared.url must not be empty".into()));
            }
        }
        self.index.validate()?;
        self.analytics.validate()?;
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(suffix: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        Error::Config(format!("Invalid {}{}='{}': {}", ENV_PREFIX, suffix, value, e))
    })
}

fn parse_bool(suffix: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "Invalid {}{}='{}': expected a boolean",
            ENV_PREFIX, suffix, value
        ))),
    }
}

// =============================================================================
// Tests
// =============================================================================
