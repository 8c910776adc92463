// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache entry and read-result types.
//!
//! A [`CacheEntry`] is what both tiers hold: the value plus the metadata
//! needed to report freshness (`created_at`, `expires_at`) and to backfill
//! the memory tier with the remaining TTL after a Redis hit.
//!
//! # Example
//!
//! ```
//! use tiered_cache::CacheEntry;
//! use serde_json::json;
//!
//! let entry = CacheEntry::new("user:42:profile", json!({"name": "Ada"}), Some(60));
//!
//! assert_eq!(entry.key, "user:42:profile");
//! assert_eq!(entry.ttl_seconds, Some(60));
//! assert!(entry.expires_at.is_some());
//! assert!(!entry.is_expired());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Longest TTL any tier honours (100 years); larger values are clamped.
pub const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Epoch-millis expiry `ttl_secs` after `from_ms`, without overflow.
pub(crate) fn expiry_after(from_ms: i64, ttl_secs: u64) -> i64 {
    // MAX_TTL_SECS * 1000 fits in i64
    let ttl_ms = (ttl_secs.min(MAX_TTL_SECS) * 1000) as i64;
    from_ms.saturating_add(ttl_ms)
}

/// Current wall-clock time in epoch milliseconds.
#[inline]
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// A cached value with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// Opaque cache key (structure is the caller's concern)
    pub key: String,
    /// The cached payload
    pub value: T,
    /// TTL applied when the entry was written, `None` = no expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
    /// Free-form tags (informational; invalidation is pattern based)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Creation timestamp (epoch millis)
    pub created_at: i64,
    /// Expiry timestamp (epoch millis)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    /// Caller-supplied metadata, returned on reads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl<T> CacheEntry<T> {
    /// Create an entry stamped with the current time.
    pub fn new(key: impl Into<String>, value: T, ttl_seconds: Option<u64>) -> Self {
        let created_at = now_millis();
        let ttl_seconds = ttl_seconds.filter(|t| *t > 0).map(|t| t.min(MAX_TTL_SECS));
        Self {
            key: key.into(),
            value,
            ttl_seconds,
            tags: Vec::new(),
            created_at,
            expires_at: ttl_seconds.map(|t| expiry_after(created_at, t)),
            metadata: None,
        }
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Option<Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Whether the entry has expired at `now` (epoch millis).
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    /// Remaining lifetime in whole seconds, rounded up.
    ///
    /// `None` when the entry never expires; `Some(0)` once expired.
    #[must_use]
    pub fn remaining_ttl(&self) -> Option<u64> {
        self.expires_at.map(|exp| {
            let left = exp.saturating_sub(now_millis());
            if left <= 0 {
                0
            } else {
                (left as u64).div_ceil(1000)
            }
        })
    }

    /// Age of the entry in milliseconds.
    #[must_use]
    pub fn age_millis(&self) -> i64 {
        (now_millis() - self.created_at).max(0)
    }

    /// Map the payload, keeping all metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheEntry<U> {
        CacheEntry {
            key: self.key,
            value: f(self.value),
            ttl_seconds: self.ttl_seconds,
            tags: self.tags,
            created_at: self.created_at,
            expires_at: self.expires_at,
            metadata: self.metadata,
        }
    }
}

/// Which tier satisfied a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    /// In-process memory tier
    Memory,
    /// Shared Redis tier
    Redis,
    /// Memory tier served while the Redis tier was enabled but unavailable
    Fallback,
}

impl CacheSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
            Self::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for CacheSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheResult<T> {
    pub value: Option<T>,
    pub hit: bool,
    pub source: Option<CacheSource>,
    /// Remaining TTL in seconds at read time
    pub ttl: Option<u64>,
    /// Creation timestamp of the entry (epoch millis)
    pub created_at: Option<i64>,
    pub metadata: Option<Value>,
}

impl<T> CacheResult<T> {
    /// A full miss.
    #[must_use]
    pub fn miss() -> Self {
        Self {
            value: None,
            hit: false,
            source: None,
            ttl: None,
            created_at: None,
            metadata: None,
        }
    }

    /// A hit built from the entry that satisfied it.
    pub fn hit(entry: CacheEntry<T>, source: CacheSource) -> Self {
        let ttl = entry.remaining_ttl();
        Self {
            value: Some(entry.value),
            hit: true,
            source: Some(source),
            ttl,
            created_at: Some(entry.created_at),
            metadata: entry.metadata,
        }
    }

    /// Consume the result, returning the value if any.
    pub fn into_value(self) -> Option<T> {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_zero_ttl_means_no_expiry_stamp() {
        let entry = CacheEntry::new("k", json!(1), Some(0));
        assert_eq!(entry.ttl_seconds, None);
        assert_eq!(entry.expires_at, None);
        assert_eq!(entry.remaining_ttl(), None);
    }

    #[test]
    fn test_huge_ttl_is_clamped_not_overflowed() {
        let entry = CacheEntry::new("k", json!(1), Some(u64::MAX));
        assert_eq!(entry.ttl_seconds, Some(MAX_TTL_SECS));
        assert_eq!(entry.expires_at, Some(entry.created_at + (MAX_TTL_SECS as i64) * 1000));
        assert!(!entry.is_expired());

        let mut far = entry.clone();
        far.expires_at = Some(i64::MIN);
        assert_eq!(far.remaining_ttl(), Some(0));
        assert_eq!(expiry_after(i64::MAX - 1, 10), i64::MAX);
    }

    #[test]
    fn test_expiry_math() {
        let mut entry = CacheEntry::new("k", json!(1), Some(10));
        assert_eq!(entry.expires_at, Some(entry.created_at + 10_000));
        assert!(!entry.is_expired_at(entry.created_at + 9_999));
        assert!(entry.is_expired_at(entry.created_at + 10_000));

        let remaining = entry.remaining_ttl().unwrap();
        assert!(remaining == 10 || remaining == 9);

        entry.expires_at = Some(now_millis() - 1);
        assert_eq!(entry.remaining_ttl(), Some(0));
        assert!(entry.is_expired());
    }

    #[test]
    fn test_map_keeps_metadata() {
        let entry = CacheEntry::new("k", json!({"x": 1}), Some(5))
            .with_tags(vec!["user".into()])
            .with_metadata(Some(json!({"origin": "db"})));
        let created = entry.created_at;

        let mapped = entry.map(|v| v["x"].as_i64().unwrap());
        assert_eq!(mapped.value, 1);
        assert_eq!(mapped.tags, vec!["user".to_string()]);
        assert_eq!(mapped.created_at, created);
        assert_eq!(mapped.metadata, Some(json!({"origin": "db"})));
    }

    #[test]
    fn test_result_from_hit() {
        let entry = CacheEntry::new("k", "v".to_string(), Some(30));
        let result = CacheResult::hit(entry, CacheSource::Redis);

        assert!(result.hit);
        assert_eq!(result.source, Some(CacheSource::Redis));
        assert!(result.ttl.unwrap() <= 30);
        assert_eq!(result.into_value(), Some("v".to_string()));
    }

    #[test]
    fn test_source_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&CacheSource::Memory).unwrap(), "\"memory\"");
        assert_eq!(CacheSource::Fallback.to_string(), "fallback");
    }
}
