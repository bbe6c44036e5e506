//! Cache Key Codec
//!
//! Derives a stable key from a logical request: provider, operation and
//! parameters. Parameter order never matters, list parameters are sorted and
//! de-duplicated. Every segment (provider, operation, names and values) is
//! percent-encoded, so `:`, `?`, `&`, `=` and `,` only ever appear as
//! separators.
//!
//! ```text
//! provider:operation?name=value&symbols=BTC,ETH
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Opaque cache key
#[derive(Clone, Debug, Eq)]
pub struct CacheKey {
    /// Pre-computed hash (for shard routing and fast comparison)
    hash: u64,
    /// Canonical key text
    text: String,
}

impl CacheKey {
    /// Start building a key for `provider` / `operation`
    pub fn builder(provider: impl Into<String>, operation: impl Into<String>) -> CacheKeyBuilder {
        CacheKeyBuilder {
            provider: encode(provider.into()),
            operation: encode(operation.into()),
            params: BTreeMap::new(),
        }
    }

    /// Wrap an already-canonical key (e.g. read back from the shared store)
    pub fn from_raw(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            hash: fx_hash(text.as_bytes()),
            text,
        }
    }

    /// Canonical key text
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Provider segment (text before the first `:`)
    pub fn provider(&self) -> &str {
        self.text.split(':').next().unwrap_or_default()
    }

    /// Shard index for this key (`shard_count` must be a power of two)
    #[inline]
    pub fn shard_index(&self, shard_count: usize) -> usize {
        (self.hash as usize) & (shard_count - 1)
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.text == other.text
    }
}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

/// Builder normalizing request parameters into a [`CacheKey`]
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    provider: String,
    operation: String,
    params: BTreeMap<String, String>,
}

impl CacheKeyBuilder {
    /// Add a scalar parameter. A repeated name replaces the earlier value.
    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params
            .insert(encode(name.into()), encode(value.to_string()));
        self
    }

    /// Add an order-insensitive list parameter (symbols, asset ids)
    pub fn list<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut items: Vec<String> = values
            .into_iter()
            .map(|v| v.as_ref().trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        items.sort();
        items.dedup();

        let encoded = items
            .into_iter()
            .map(encode)
            .collect::<Vec<_>>()
            .join(",");
        self.params.insert(encode(name.into()), encoded);
        self
    }

    /// Produce the canonical key
    pub fn build(self) -> CacheKey {
        let mut text = format!("{}:{}", self.provider, self.operation);

        // BTreeMap iteration is sorted by name
        for (i, (name, value)) in self.params.iter().enumerate() {
            text.push(if i == 0 { '?' } else { '&' });
            text.push_str(name);
            text.push('=');
            text.push_str(value);
        }

        CacheKey::from_raw(text)
    }
}

fn encode(segment: String) -> String {
    urlencoding::encode(&segment).into_owned()
}

/// Fast non-cryptographic hash (FxHash algorithm)
#[inline]
fn fx_hash(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }
    hash
}

// =============================================================================
// Tests
// =============================================================================
