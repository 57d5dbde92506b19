//! Query normalization and cache-key derivation.
//!
//! Free-text queries and structured filters are folded into a canonical
//! form (NFKC, trimmed, whitespace collapsed, lower-cased, filters sorted and
//! deduplicated) and then hashed with length-prefixed SHA-256.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::error::{CacheError, Result};

/// Length of a hex-encoded cache key.
pub const KEY_LEN: usize = 64;

/// Bumped whenever the canonical form changes so old records stop matching.
const KEY_SCHEMA: &str = "regcache/v1";

/// Caller-supplied query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParams {
    /// Free-text research question.
    pub query: String,
    /// Target jurisdiction, e.g. `tw`.
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    /// Any other discriminating filters the pipeline varies on.
    #[serde(default)]
    pub filters: BTreeMap<String, Vec<String>>,
}

impl QueryParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn industry(mut self, industry: impl Into<String>) -> Self {
        self.industry = Some(industry.into());
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Add one value to a multi-value filter.
    pub fn filter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Fold the parameters into their canonical form.
    ///
    /// Fails when the query text is empty after normalization or a filter
    /// has an empty name.
    pub fn normalize(&self) -> Result<NormalizedQuery> {
        let query = normalize_text(&self.query);
        if query.is_empty() {
            return Err(CacheError::KeyNormalization(
                "query text is empty".to_string(),
            ));
        }

        let mut filters = BTreeMap::new();
        for (name, values) in &self.filters {
            let name = normalize_text(name);
            if name.is_empty() {
                return Err(CacheError::KeyNormalization(
                    "filter name is empty".to_string(),
                ));
            }
            let merged: &mut Vec<String> = filters.entry(name).or_default();
            merged.extend(
                values
                    .iter()
                    .map(|v| normalize_text(v))
                    .filter(|v| !v.is_empty()),
            );
        }
        for values in filters.values_mut() {
            values.sort();
            values.dedup();
        }
        // A filter with no usable values constrains nothing.
        filters.retain(|_, values| !values.is_empty());

        Ok(NormalizedQuery {
            query,
            region: normalize_optional(self.region.as_deref()),
            industry: normalize_optional(self.industry.as_deref()),
            topic: normalize_optional(self.topic.as_deref()),
            filters,
        })
    }
}

/// Query parameters after normalization. Equal values always produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedQuery {
    pub query: String,
    pub region: Option<String>,
    pub industry: Option<String>,
    pub topic: Option<String>,
    pub filters: BTreeMap<String, Vec<String>>,
}

impl NormalizedQuery {
    /// Derive the cache key.
    pub fn key(&self) -> CacheKey {
        let mut hasher = Sha256::new();
        update_field(&mut hasher, KEY_SCHEMA);
        update_field(&mut hasher, &self.query);
        for field in [&self.region, &self.industry, &self.topic] {
            match field {
                // Tag byte keeps `None` distinct from `Some("")`-like values.
                Some(value) => {
                    hasher.update([1u8]);
                    update_field(&mut hasher, value);
                }
                None => hasher.update([0u8]),
            }
        }
        hasher.update((self.filters.len() as u64).to_le_bytes());
        for (name, values) in &self.filters {
            update_field(&mut hasher, name);
            hasher.update((values.len() as u64).to_le_bytes());
            for value in values {
                update_field(&mut hasher, value);
            }
        }
        CacheKey(hex::encode(hasher.finalize()))
    }

    /// Short human-readable form used in listings, e.g. `tw | finance | cyber | query`.
    pub fn describe(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for value in [&self.region, &self.industry, &self.topic]
            .into_iter()
            .flatten()
        {
            parts.push(value);
        }
        parts.push(&self.query);
        let mut out = parts.join(" | ");
        for (name, values) in &self.filters {
            out.push_str(&format!(" [{}={}]", name, values.join(",")));
        }
        out
    }
}

/// Fingerprint of a normalized query: 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    /// Parse a key previously produced by [`compute_key`].
    ///
    /// Only 64 lowercase hex characters are accepted, so a parsed key is
    /// always safe to use as a file name.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.len() == KEY_LEN && raw.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            Ok(Self(raw.to_string()))
        } else {
            Err(CacheError::KeyNormalization(format!(
                "'{}' is not a cache key",
                raw
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CacheKey {
    type Error = CacheError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

/// Normalize `params` and derive their cache key.
pub fn compute_key(params: &QueryParams) -> Result<CacheKey> {
    Ok(params.normalize()?.key())
}

fn normalize_text(raw: &str) -> String {
    let folded: String = raw.nfkc().collect();
    folded
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn normalize_optional(raw: Option<&str>) -> Option<String> {
    raw.map(normalize_text).filter(|v| !v.is_empty())
}

/// Length-prefixed so `("a|b", "")` and `("a", "|b")` never collide.
fn update_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}
