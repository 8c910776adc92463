// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-call cache options and their resolution.
//!
//! Callers pass a sparse [`CacheOptions`]; the service resolves it once per
//! call into a closed [`ResolvedOptions`] using, in order:
//!
//! 1. explicit option fields
//! 2. the selected strategy's [`StrategyPolicy`](crate::StrategyPolicy)
//! 3. configuration defaults (`default_ttl_secs`, both tiers on, no compression)
//!
//! A TTL of `0` counts as absent, so it falls through to the strategy or the
//! default. Entries never live forever by accident.
//!
//! # Example
//!
//! ```rust
//! use tiered_cache::{CacheConfig, CacheOptions, CacheStrategy};
//!
//! let config = CacheConfig::default();
//!
//! let resolved = CacheOptions::strategy(CacheStrategy::Session).resolve(&config);
//! assert_eq!(resolved.ttl_secs, 24 * 60 * 60);
//! assert!(!resolved.use_memory);
//!
//! // Explicit fields beat the strategy
//! let resolved = CacheOptions::strategy(CacheStrategy::Session)
//!     .with_ttl(60)
//!     .with_memory(true)
//!     .resolve(&config);
//! assert_eq!(resolved.ttl_secs, 60);
//! assert!(resolved.use_memory);
//! ```

use serde_json::Value;

use crate::config::CacheConfig;
use crate::entry::MAX_TTL_SECS;
use crate::strategy::CacheStrategy;

/// Sparse per-call overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheOptions {
    /// TTL in seconds (`Some(0)` is treated as unset)
    pub ttl: Option<u64>,
    pub use_memory: Option<bool>,
    pub use_redis: Option<bool>,
    pub compression: Option<bool>,
    pub tags: Vec<String>,
    pub strategy: Option<CacheStrategy>,
    /// Stored with the entry and returned on reads
    pub metadata: Option<Value>,
}

impl CacheOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options selecting a named strategy.
    #[must_use]
    pub fn strategy(strategy: CacheStrategy) -> Self {
        Self {
            strategy: Some(strategy),
            ..Self::default()
        }
    }

    /// Options with an explicit TTL.
    #[must_use]
    pub fn ttl(ttl_secs: u64) -> Self {
        Self::default().with_ttl(ttl_secs)
    }

    /// Only the in-process tier.
    #[must_use]
    pub fn memory_only() -> Self {
        Self::default().with_memory(true).with_redis(false)
    }

    /// Only the Redis tier.
    #[must_use]
    pub fn redis_only() -> Self {
        Self::default().with_memory(false).with_redis(true)
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl = Some(ttl_secs);
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    #[must_use]
    pub fn with_memory(mut self, enabled: bool) -> Self {
        self.use_memory = Some(enabled);
        self
    }

    #[must_use]
    pub fn with_redis(mut self, enabled: bool) -> Self {
        self.use_redis = Some(enabled);
        self
    }

    #[must_use]
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = Some(enabled);
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Close the options against `config`.
    #[must_use]
    pub fn resolve(&self, config: &CacheConfig) -> ResolvedOptions {
        let policy = self.strategy.map(|s| *config.strategies.get(s));

        let ttl_secs = self
            .ttl
            .filter(|t| *t > 0)
            .or(policy.map(|p| p.ttl_secs))
            .filter(|t| *t > 0)
            .unwrap_or(config.default_ttl_secs)
            .clamp(1, MAX_TTL_SECS);

        ResolvedOptions {
            ttl_secs,
            use_memory: self
                .use_memory
                .or(policy.map(|p| p.use_memory))
                .unwrap_or(true),
            use_redis: config.redis.enabled
                && self.use_redis.or(policy.map(|p| p.use_redis)).unwrap_or(true),
            compression: self
                .compression
                .or(policy.map(|p| p.compression))
                .unwrap_or(false),
            tags: self.tags.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

impl From<CacheStrategy> for CacheOptions {
    fn from(strategy: CacheStrategy) -> Self {
        Self::strategy(strategy)
    }
}

/// Fully resolved, closed options for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    /// Effective TTL in seconds, always at least 1
    pub ttl_secs: u64,
    pub use_memory: bool,
    /// `false` whenever Redis is disabled in configuration
    pub use_redis: bool,
    pub compression: bool,
    pub tags: Vec<String>,
    pub metadata: Option<Value>,
}

impl ResolvedOptions {
    /// Whether any tier is enabled for this call.
    #[must_use]
    pub fn uses_any_tier(&self) -> bool {
        self.use_memory || self.use_redis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;

    #[test]
    fn test_defaults_without_strategy() {
        let config = CacheConfig::default();
        let resolved = CacheOptions::new().resolve(&config);

        assert_eq!(resolved.ttl_secs, config.default_ttl_secs);
        assert!(resolved.use_memory);
        assert!(resolved.use_redis);
        assert!(!resolved.compression);
    }

    #[test]
    fn test_zero_ttl_falls_through_to_strategy() {
        let config = CacheConfig::default();
        let resolved = CacheOptions::strategy(CacheStrategy::ApiResponse)
            .with_ttl(0)
            .resolve(&config);

        assert_eq!(resolved.ttl_secs, config.strategies.api_response.ttl_secs);
    }

    #[test]
    fn test_zero_ttl_without_strategy_uses_default() {
        let config = CacheConfig::default();
        let resolved = CacheOptions::ttl(0).resolve(&config);
        assert_eq!(resolved.ttl_secs, config.default_ttl_secs);
    }

    #[test]
    fn test_explicit_fields_override_strategy() {
        let config = CacheConfig::default();
        let resolved = CacheOptions::strategy(CacheStrategy::AiResponse)
            .with_compression(false)
            .with_redis(false)
            .resolve(&config);

        assert_eq!(resolved.ttl_secs, config.strategies.ai_response.ttl_secs);
        assert!(!resolved.compression);
        assert!(!resolved.use_redis);
        assert!(resolved.use_memory);
    }

    #[test]
    fn test_redis_disabled_globally_wins() {
        let mut config = CacheConfig::for_environment(Environment::Test);
        config.redis.enabled = false;

        let resolved = CacheOptions::redis_only().resolve(&config);
        assert!(!resolved.use_redis);
        assert!(!resolved.use_memory);
        assert!(!resolved.uses_any_tier());
    }

    #[test]
    fn test_tags_and_metadata_carried() {
        let config = CacheConfig::default();
        let resolved = CacheOptions::new()
            .with_tags(["user", "profile"])
            .with_metadata(serde_json::json!({"source": "db"}))
            .resolve(&config);

        assert_eq!(resolved.tags, vec!["user".to_string(), "profile".to_string()]);
        assert_eq!(resolved.metadata, Some(serde_json::json!({"source": "db"})));
    }

    #[test]
    fn test_huge_ttl_is_clamped() {
        let config = CacheConfig::default();
        let resolved = CacheOptions::ttl(10u64.pow(17)).resolve(&config);
        assert_eq!(resolved.ttl_secs, MAX_TTL_SECS);
    }
}
