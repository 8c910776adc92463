// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Named caching strategies.
//!
//! A strategy is a closed, validated bundle of defaults (TTL, which tiers to
//! use, whether to compress) that callers select by name instead of
//! repeating per-call options. Explicit [`CacheOptions`](crate::CacheOptions)
//! fields still win over the strategy.
//!
//! | Strategy         | TTL      | Memory | Redis | Compression |
//! |------------------|----------|--------|-------|-------------|
//! | `api_response`   | 5 min    | yes    | yes   | no          |
//! | `ai_response`    | 1 hour   | yes    | yes   | yes         |
//! | `user_data`      | 15 min   | yes    | yes   | no          |
//! | `database_query` | 10 min   | yes    | yes   | no          |
//! | `session`        | 24 hours | no     | yes   | no          |
//! | `static_asset`   | 7 days   | yes    | yes   | yes         |
//!
//! Sessions skip the memory tier so that a logout on one node is visible
//! everywhere immediately.
//!
//! # Example
//!
//! ```rust
//! use tiered_cache::{CacheStrategy, StrategyTable};
//!
//! let table = StrategyTable::default();
//! let policy = table.get(CacheStrategy::Session);
//! assert_eq!(policy.ttl_secs, 24 * 60 * 60);
//! assert!(!policy.use_memory);
//!
//! let parsed: CacheStrategy = "ai_response".parse().unwrap();
//! assert_eq!(parsed, CacheStrategy::AiResponse);
//! assert_eq!(parsed.env_var(), "CACHE_AI_RESPONSE_TTL");
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Longest TTL any strategy may configure (30 days).
pub const MAX_STRATEGY_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Closed set of named strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    ApiResponse,
    AiResponse,
    UserData,
    DatabaseQuery,
    Session,
    StaticAsset,
}

impl CacheStrategy {
    /// Every strategy, in table order.
    pub const ALL: [CacheStrategy; 6] = [
        Self::ApiResponse,
        Self::AiResponse,
        Self::UserData,
        Self::DatabaseQuery,
        Self::Session,
        Self::StaticAsset,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiResponse => "api_response",
            Self::AiResponse => "ai_response",
            Self::UserData => "user_data",
            Self::DatabaseQuery => "database_query",
            Self::Session => "session",
            Self::StaticAsset => "static_asset",
        }
    }

    /// Environment variable overriding this strategy's TTL.
    #[must_use]
    pub fn env_var(&self) -> String {
        format!("CACHE_{}_TTL", self.as_str().to_ascii_uppercase())
    }
}

impl std::fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown strategy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown cache strategy '{0}'")]
pub struct UnknownStrategy(pub String);

impl FromStr for CacheStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| UnknownStrategy(s.to_string()))
    }
}

/// Defaults applied when a strategy is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct StrategyPolicy {
    /// Default TTL in seconds
    #[validate(range(min = 1, max = 2_592_000, message = "must be between 1 second and 30 days"))]
    pub ttl_secs: u64,
    /// Use the in-process tier
    #[serde(default = "default_true")]
    pub use_memory: bool,
    /// Use the Redis tier
    #[serde(default = "default_true")]
    pub use_redis: bool,
    /// Compress Redis payloads
    #[serde(default)]
    pub compression: bool,
}

fn default_true() -> bool {
    true
}

impl StrategyPolicy {
    #[must_use]
    pub const fn new(ttl_secs: u64, use_memory: bool, use_redis: bool, compression: bool) -> Self {
        Self {
            ttl_secs,
            use_memory,
            use_redis,
            compression,
        }
    }

    /// Same policy with a different TTL.
    #[must_use]
    pub const fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }
}

/// One policy per [`CacheStrategy`].
///
/// Named fields (rather than a map) keep the set closed and give each
/// strategy a stable configuration path such as `strategies.session.ttl_secs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StrategyTable {
    #[validate(nested)]
    pub api_response: StrategyPolicy,
    #[validate(nested)]
    pub ai_response: StrategyPolicy,
    #[validate(nested)]
    pub user_data: StrategyPolicy,
    #[validate(nested)]
    pub database_query: StrategyPolicy,
    #[validate(nested)]
    pub session: StrategyPolicy,
    #[validate(nested)]
    pub static_asset: StrategyPolicy,
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self {
            api_response: StrategyPolicy::new(5 * 60, true, true, false),
            ai_response: StrategyPolicy::new(60 * 60, true, true, true),
            user_data: StrategyPolicy::new(15 * 60, true, true, false),
            database_query: StrategyPolicy::new(10 * 60, true, true, false),
            session: StrategyPolicy::new(24 * 60 * 60, false, true, false),
            static_asset: StrategyPolicy::new(7 * 24 * 60 * 60, true, true, true),
        }
    }
}

impl StrategyTable {
    #[must_use]
    pub fn get(&self, strategy: CacheStrategy) -> &StrategyPolicy {
        match strategy {
            CacheStrategy::ApiResponse => &self.api_response,
            CacheStrategy::AiResponse => &self.ai_response,
            CacheStrategy::UserData => &self.user_data,
            CacheStrategy::DatabaseQuery => &self.database_query,
            CacheStrategy::Session => &self.session,
            CacheStrategy::StaticAsset => &self.static_asset,
        }
    }

    pub fn get_mut(&mut self, strategy: CacheStrategy) -> &mut StrategyPolicy {
        match strategy {
            CacheStrategy::ApiResponse => &mut self.api_response,
            CacheStrategy::AiResponse => &mut self.ai_response,
            CacheStrategy::UserData => &mut self.user_data,
            CacheStrategy::DatabaseQuery => &mut self.database_query,
            CacheStrategy::Session => &mut self.session,
            CacheStrategy::StaticAsset => &mut self.static_asset,
        }
    }

    /// Scale every TTL by `factor`, keeping at least one second.
    #[must_use]
    pub fn scaled(mut self, factor: f64) -> Self {
        for strategy in CacheStrategy::ALL {
            let policy = self.get_mut(strategy);
            policy.ttl_secs = ((policy.ttl_secs as f64 * factor).round() as u64).max(1);
        }
        self
    }

    /// Redis enablement for every strategy.
    #[must_use]
    pub fn with_redis(mut self, use_redis: bool) -> Self {
        for strategy in CacheStrategy::ALL {
            self.get_mut(strategy).use_redis = use_redis;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_common_spellings() {
        assert_eq!("api_response".parse::<CacheStrategy>().unwrap(), CacheStrategy::ApiResponse);
        assert_eq!("Static-Asset".parse::<CacheStrategy>().unwrap(), CacheStrategy::StaticAsset);
        assert_eq!(" session ".parse::<CacheStrategy>().unwrap(), CacheStrategy::Session);

        let err = "forever".parse::<CacheStrategy>().unwrap_err();
        assert_eq!(err.to_string(), "unknown cache strategy 'forever'");
    }

    #[test]
    fn test_every_strategy_round_trips_through_name() {
        for strategy in CacheStrategy::ALL {
            assert_eq!(strategy.as_str().parse::<CacheStrategy>().unwrap(), strategy);
            let json = serde_json::to_string(&strategy).unwrap();
            assert_eq!(json, format!("\"{}\"", strategy.as_str()));
        }
    }

    #[test]
    fn test_env_var_names() {
        assert_eq!(CacheStrategy::DatabaseQuery.env_var(), "CACHE_DATABASE_QUERY_TTL");
        assert_eq!(CacheStrategy::UserData.env_var(), "CACHE_USER_DATA_TTL");
    }

    #[test]
    fn test_default_table_is_valid() {
        let table = StrategyTable::default();
        assert!(table.validate().is_ok());
        assert!(table.get(CacheStrategy::AiResponse).compression);
        assert!(!table.get(CacheStrategy::ApiResponse).compression);
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut table = StrategyTable::default();
        table.get_mut(CacheStrategy::UserData).ttl_secs = 0;

        let errors = table.validate().unwrap_err();
        assert!(errors.errors().contains_key("user_data"));
        assert!(!errors.errors().contains_key("session"));
    }

    #[test]
    fn test_scaled_keeps_minimum() {
        let table = StrategyTable::default().scaled(0.0001);
        for strategy in CacheStrategy::ALL {
            assert!(table.get(strategy).ttl_secs >= 1);
        }
    }

    #[test]
    fn test_with_redis_disables_all() {
        let table = StrategyTable::default().with_redis(false);
        assert!(CacheStrategy::ALL.iter().all(|s| !table.get(*s).use_redis));
    }
}
