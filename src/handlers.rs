// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache management handlers.
//!
//! Framework-agnostic functions for an admin router to mount: invalidate
//! by key or pattern, and report stats and health. Payloads are plain
//! serde types; routing, authentication and response framing belong to
//! the caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::options::CacheOptions;
use crate::service::{CacheHealth, CacheService, CacheStats, HealthStatus};

/// Rejected management request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("key must not be empty")]
    EmptyKey,

    #[error("pattern must not be empty")]
    EmptyPattern,

    #[error("pattern {0:?} would clear the whole cache")]
    MatchesEverything(String),

    #[error("request must name a key or a pattern")]
    MissingTarget,
}

impl HandlerError {
    /// HTTP status for the error. All are client errors.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        400
    }
}

/// Body of an invalidation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidateRequest {
    pub key: Option<String>,
    pub pattern: Option<String>,
}

/// Result of an invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidateResponse {
    pub pattern_or_key: String,
    pub removed: usize,
}

/// Remove one key from every tier.
pub async fn invalidate_key(cache: &CacheService, key: &str) -> Result<InvalidateResponse, HandlerError> {
    if key.trim().is_empty() {
        return Err(HandlerError::EmptyKey);
    }
    let removed = usize::from(cache.del(key, &CacheOptions::new()).await);
    info!(key, removed, "Manual cache invalidation");
    Ok(InvalidateResponse {
        pattern_or_key: key.to_string(),
        removed,
    })
}

/// Remove every key matching a glob.
///
/// A pattern made only of `*` is refused unless `allow_match_all` is set.
pub async fn invalidate_pattern(
    cache: &CacheService,
    pattern: &str,
    allow_match_all: bool,
) -> Result<InvalidateResponse, HandlerError> {
    if pattern.trim().is_empty() {
        return Err(HandlerError::EmptyPattern);
    }
    if !allow_match_all && pattern.trim().chars().all(|c| c == '*') {
        return Err(HandlerError::MatchesEverything(pattern.to_string()));
    }
    let removed = cache.invalidate_by_pattern(pattern).await;
    Ok(InvalidateResponse {
        pattern_or_key: pattern.to_string(),
        removed,
    })
}

/// Dispatch a deserialized [`InvalidateRequest`]. A key wins over a pattern.
pub async fn invalidate(
    cache: &CacheService,
    request: &InvalidateRequest,
    allow_match_all: bool,
) -> Result<InvalidateResponse, HandlerError> {
    match (&request.key, &request.pattern) {
        (Some(key), _) => invalidate_key(cache, key).await,
        (None, Some(pattern)) => invalidate_pattern(cache, pattern, allow_match_all).await,
        (None, None) => Err(HandlerError::MissingTarget),
    }
}

#[must_use]
pub fn stats(cache: &CacheService) -> CacheStats {
    cache.stats()
}

#[must_use]
pub fn health(cache: &CacheService) -> CacheHealth {
    cache.health()
}

/// HTTP status for a health report: degraded still serves, so only a closed
/// service is `503`.
#[must_use]
pub fn health_status_code(health: &CacheHealth) -> u16 {
    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => 200,
        HealthStatus::Unhealthy => 503,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::test_support::*;

    #[tokio::test]
    async fn test_invalidate_key() {
        let (cache, _) = service_with_store();
        cache.set("user:1", &1, &CacheOptions::new()).await;

        let response = invalidate_key(&cache, "user:1").await.unwrap();
        assert_eq!(response.removed, 1);
        assert_eq!(response.pattern_or_key, "user:1");
        assert_eq!(invalidate_key(&cache, "user:1").await.unwrap().removed, 0);
        assert_eq!(invalidate_key(&cache, "  ").await, Err(HandlerError::EmptyKey));
    }

    #[tokio::test]
    async fn test_invalidate_pattern_guards() {
        let cache = memory_only();
        for i in 0..3 {
            cache.set(&format!("user:{i}"), &i, &CacheOptions::new()).await;
        }
        cache.set("other", &0, &CacheOptions::new()).await;

        assert_eq!(invalidate_pattern(&cache, "", false).await, Err(HandlerError::EmptyPattern));
        assert!(matches!(
            invalidate_pattern(&cache, "*", false).await,
            Err(HandlerError::MatchesEverything(_))
        ));
        assert_eq!(invalidate_pattern(&cache, "user:*", false).await.unwrap().removed, 3);
        assert_eq!(invalidate_pattern(&cache, "*", true).await.unwrap().removed, 1);
    }

    #[tokio::test]
    async fn test_invalidate_request_dispatch() {
        let cache = memory_only();
        cache.set("a", &1, &CacheOptions::new()).await;

        let request: InvalidateRequest = serde_json::from_str(r#"{"pattern":"a*"}"#).unwrap();
        assert_eq!(invalidate(&cache, &request, false).await.unwrap().removed, 1);
        assert_eq!(
            invalidate(&cache, &InvalidateRequest::default(), false).await,
            Err(HandlerError::MissingTarget)
        );
    }

    #[tokio::test]
    async fn test_stats_and_health_serialize() {
        let cache = memory_only();
        cache.get::<u32>("missing", &CacheOptions::new()).await;

        let stats = serde_json::to_value(stats(&cache)).unwrap();
        assert_eq!(stats["misses"], 1);

        let report = health(&cache);
        assert_eq!(health_status_code(&report), 200);
        cache.close().await;
        assert_eq!(health_status_code(&health(&cache)), 503);
    }
}
