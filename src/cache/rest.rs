//! REST Shared Store Adapter
//!
//! Implements [`SharedStore`] against a PostgREST-style table:
//!
//! ```sql
//! create table market_cache (
//!     key         text primary key,
//!     value       jsonb not null,
//!     ttl_seconds integer not null,
//!     updated_at  timestamptz not null default now()
//! );
//! -- plus a BEFORE UPDATE trigger setting updated_at = now()
//! ```
//!
//! The client never sends `updated_at`; freshness is always judged against
//! the server's clock.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::entry::SharedCacheRow;
use super::store::SharedStore;
use crate::error::{Error, Result};

/// Connection settings for the REST store
#[derive(Debug, Clone, Deserialize)]
pub struct RestStoreConfig {
    /// Base URL (e.g. `https://project.example.co`)
    pub url: String,
    /// Table name
    #[serde(default = "default_table")]
    pub table: String,
    /// API key sent as `apikey` and bearer token
    #[serde(default)]
    pub api_key: Option<String>,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_table() -> String {
    "market_cache".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

impl RestStoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            table: default_table(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Serialize)]
struct UpsertBody<'a> {
    key: &'a str,
    value: serde_json::Value,
    ttl_seconds: i64,
}

/// Shared store backed by a PostgREST endpoint
pub struct RestSharedStore {
    config: RestStoreConfig,
    client: Client,
}

impl RestSharedStore {
    /// Build the HTTP client
    pub fn new(config: RestStoreConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = &config.api_key {
            let key = HeaderValue::from_str(api_key)
                .map_err(|e| Error::Config(format!("Invalid API key header: {}", e)))?;
            let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| Error::Config(format!("Invalid API key header: {}", e)))?;
            headers.insert("apikey", key);
            headers.insert(AUTHORIZATION, bearer);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn table_url(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.url.trim_end_matches('/'),
            self.config.table
        )
    }

    fn row_url(&self, key: &str) -> String {
        format!(
            "{}?key=eq.{}&select=key,value,updated_at,ttl_seconds&limit=1",
            self.table_url(),
            urlencoding::encode(key)
        )
    }

    fn upsert_url(&self) -> String {
        format!("{}?on_conflict=key", self.table_url())
    }

    async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::SharedStoreStatus {
            status: status.as_u16(),
            body,
        })
    }
}

impl std::fmt::Debug for RestSharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestSharedStore")
            .field("url", &self.config.url)
            .field("table", &self.config.table)
            .finish()
    }
}

#[async_trait]
impl SharedStore for RestSharedStore {
    #[instrument(skip(self))]
    async fn fetch_row(&self, key: &str) -> Result<Option<SharedCacheRow>> {
        let response = self
            .client
            .get(self.row_url(key))
            .send()
            .await
            .map_err(Error::SharedStoreConnection)?;
        let response = Self::error_for_status(response).await?;

        let rows: Vec<SharedCacheRow> =
            response
                .json()
                .await
                .map_err(|e| Error::SharedCacheCorrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                })?;

        debug!(rows = rows.len(), "Fetched shared cache row");
        Ok(rows.into_iter().next())
    }

    #[instrument(skip(self, value))]
    async fn upsert_row(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl_seconds: i64,
    ) -> Result<()> {
        let body = [UpsertBody {
            key,
            value,
            ttl_seconds,
        }];

        let response = self
            .client
            .post(self.upsert_url())
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&body)
            .send()
            .await
            .map_err(Error::SharedStoreConnection)?;
        Self::error_for_status(response).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}?select=key&limit=1", self.table_url());
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(Error::SharedStoreConnection)?;
        Ok(response.status().is_success())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn store(url: &str) -> RestSharedStore {
        RestSharedStore::new(RestStoreConfig {
            url: url.to_string(),
            table: "market_cache".to_string(),
            api_key: Some("anon-key".to_string()),
            timeout_secs: 2,
        })
        .unwrap()
    }

    #[test]
    fn test_row_url_encodes_key() {
        let store = store("https://db.example.co/");
        assert_eq!(
            store.row_url("coingecko:prices?ids=bitcoin,ethereum"),
            "https://db.example.co/rest/v1/market_cache?key=eq.coingecko%3Aprices%3Fids%3Dbitcoin%2Cethereum&select=key,value,updated_at,ttl_seconds&limit=1"
        );
    }

    #[test]
    fn test_upsert_url() {
        let store = store("https://db.example.co");
        assert_eq!(
            store.upsert_url(),
            "https://db.example.co/rest/v1/market_cache?on_conflict=key"
        );
    }

    #[test]
    fn test_invalid_api_key_rejected() {
        let result = RestSharedStore::new(RestStoreConfig {
            api_key: Some("bad\nkey".to_string()),
            ..RestStoreConfig::new("https://db.example.co")
        });
        assert_matches!(result, Err(Error::Config(_)));
    }

    #[test]
    fn test_config_defaults() {
        let config: RestStoreConfig =
            serde_json::from_str(r#"{"url": "https://db.example.co"}"#).unwrap();
        assert_eq!(config.table, "market_cache");
        assert_eq!(config.timeout_secs, 10);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_rows_decode_from_postgrest_payload() {
        let payload = r#"[{"key":"k","value":{"p":1.5},"updated_at":"2026-01-02T03:04:05+00:00","ttl_seconds":300}]"#;
        let rows: Vec<SharedCacheRow> = serde_json::from_str(payload).unwrap();
        assert_eq!(rows[0].ttl_seconds, 300);
        assert_eq!(rows[0].value["p"], 1.5);
    }

    #[tokio::test]
    async fn test_unreachable_store_reports_connection_error() {
        let store = store("http://127.0.0.1:1");
        assert_matches!(
            store.fetch_row("k").await,
            Err(Error::SharedStoreConnection(_))
        );
    }
}
