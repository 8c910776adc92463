// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP response caching on top of [`CacheService`].
//!
//! # Policy
//!
//! ```text
//! get(request)
//!   ├─ method not GET/HEAD ───────────────► miss
//!   ├─ request no-store | no-cache ───────► bypass (miss, nothing read)
//!   ├─ stored, older than its max-age ────► delete, stale (miss)
//!   └─ stored ────────────────────────────► hit
//!
//! set(request, response)
//!   ├─ should_cache(method, path, status, size) fails ─► rejected
//!   ├─ request no-store / response no-store ───────────► rejected
//!   ├─ response private without a user ────────────────► rejected
//!   ├─ response max-age=0 ─────────────────────────────► rejected
//!   └─ stored with ttl = min(max-age, strategy ttl)
//! ```
//!
//! Keys include the user, so authenticated responses never cross users.
//!
//! # Example
//!
//! ```rust,no_run
//! use tiered_cache::response::{CachedResponse, RequestParts, ResponseCache};
//! use tiered_cache::{CacheConfig, CacheService};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = CacheService::open(CacheConfig::load()?).await?;
//! let responses = ResponseCache::new(service);
//!
//! let request = RequestParts::new("GET", "/api/items").with_query("page=2");
//! if responses.get(&request).await.response.is_none() {
//!     let response = CachedResponse::new(200, br#"{"items":[]}"#.to_vec())
//!         .with_header("content-type", "application/json")
//!         .with_header("cache-control", "public, max-age=60");
//!     responses.set(&request, response).await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache_control;
pub mod etag;
pub mod key;

pub use cache_control::{parse_cache_control, CacheControl};
pub use etag::{check_if_none_match, generate_etag};
pub use key::{generate_cache_key, RequestParts};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ResponseCacheConfig;
use crate::entry::{now_millis, CacheSource};
use crate::options::CacheOptions;
use crate::service::CacheService;

/// A response as stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    /// Header names are stored lowercase
    pub headers: BTreeMap<String, String>,
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,
    pub etag: Option<String>,
    /// Epoch millis when stored
    pub cached_at: i64,
    /// Shared-cache freshness lifetime in seconds, from the response's
    /// `Cache-Control`
    pub max_age: Option<u64>,
}

impl CachedResponse {
    #[must_use]
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body,
            etag: None,
            cached_at: now_millis(),
            max_age: None,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Seconds since the response was stored, for the `Age` header.
    #[must_use]
    pub fn age_secs(&self) -> u64 {
        u64::try_from((now_millis() - self.cached_at).max(0)).unwrap_or(0) / 1000
    }

    fn is_stale(&self, now: i64) -> bool {
        self.max_age.is_some_and(|max_age| {
            let max_age_ms = i64::try_from(max_age.saturating_mul(1000)).unwrap_or(i64::MAX);
            now - self.cached_at >= max_age_ms
        })
    }
}

/// Result of [`ResponseCache::get`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseLookup {
    pub key: String,
    pub response: Option<CachedResponse>,
    pub source: Option<CacheSource>,
}

impl ResponseLookup {
    #[must_use]
    pub fn is_hit(&self) -> bool {
        self.response.is_some()
    }
}

/// HTTP-aware cache over a [`CacheService`].
#[derive(Debug, Clone)]
pub struct ResponseCache {
    service: CacheService,
    config: ResponseCacheConfig,
}

impl ResponseCache {
    /// Use the service's own `response` configuration.
    #[must_use]
    pub fn new(service: CacheService) -> Self {
        let config = service.config().response.clone();
        Self { service, config }
    }

    #[must_use]
    pub fn with_config(service: CacheService, config: ResponseCacheConfig) -> Self {
        Self { service, config }
    }

    #[must_use]
    pub fn config(&self) -> &ResponseCacheConfig {
        &self.config
    }

    #[must_use]
    pub fn service(&self) -> &CacheService {
        &self.service
    }

    /// Cache key for a request.
    #[must_use]
    pub fn generate_cache_key(&self, parts: &RequestParts) -> String {
        generate_cache_key(&self.config.key_prefix, parts, &self.config.vary_headers)
    }

    /// Whether a response to `method path` with this status and body size
    /// may be stored. `exclude_status` takes precedence over
    /// `include_status`.
    #[must_use]
    pub fn should_cache(&self, method: &str, path: &str, status: u16, body_len: usize) -> bool {
        if !self.config.enabled {
            return false;
        }
        if !is_cacheable_method(method) {
            return false;
        }
        if self.config.excluded_paths.iter().any(|prefix| path.starts_with(prefix.as_str())) {
            return false;
        }
        if self.config.exclude_status.contains(&status) || !self.config.include_status.contains(&status) {
            return false;
        }
        body_len <= self.config.max_body_bytes
    }

    /// Look up the stored response for a request.
    #[tracing::instrument(skip(self, parts), fields(method = %parts.method, path = %parts.path))]
    pub async fn get(&self, parts: &RequestParts) -> ResponseLookup {
        let key = self.generate_cache_key(parts);
        let miss = |key: String| ResponseLookup { key, response: None, source: None };

        if !self.config.enabled || !is_cacheable_method(&parts.method) {
            return miss(key);
        }
        let request_cc = parts.header("cache-control").map(parse_cache_control).unwrap_or_default();
        if request_cc.bypasses_read() {
            debug!(key = %key, "Request cache-control bypasses the cache");
            crate::metrics::record_response_cache("bypass");
            return miss(key);
        }

        let options = self.options();
        let result = self.service.get::<CachedResponse>(&key, &options).await;
        let source = result.source;
        let Some(response) = result.into_value() else {
            crate::metrics::record_response_cache("miss");
            return miss(key);
        };

        if response.is_stale(now_millis()) {
            debug!(key = %key, "Stored response outlived its max-age");
            self.service.del(&key, &options).await;
            crate::metrics::record_response_cache("stale");
            return miss(key);
        }

        crate::metrics::record_response_cache("hit");
        ResponseLookup { key, response: Some(response), source }
    }

    /// Store a response for a request. Returns `false` when policy forbids
    /// it or no tier accepted the write.
    ///
    /// The stored copy gets `cached_at`, `max_age` and an `etag` (taken from
    /// the response's `ETag` header or computed from the body).
    #[tracing::instrument(skip(self, parts, response), fields(method = %parts.method, path = %parts.path, status = response.status))]
    pub async fn set(&self, parts: &RequestParts, mut response: CachedResponse) -> bool {
        if let Some(reason) = self.rejection(parts, &response) {
            debug!(reason, "Response not cached");
            crate::metrics::record_response_cache("rejected");
            return false;
        }

        let response_cc = response.header("cache-control").map(parse_cache_control).unwrap_or_default();
        let strategy_ttl = self.service.config().strategies.get(self.config.strategy).ttl_secs;
        let ttl = response_cc.shared_max_age().map_or(strategy_ttl, |max_age| max_age.min(strategy_ttl));

        response.cached_at = now_millis();
        response.max_age = response_cc.shared_max_age();
        if response.etag.is_none() {
            response.etag = Some(match response.header("etag") {
                Some(tag) => tag.to_string(),
                None => generate_etag(&response.body),
            });
        }

        let key = self.generate_cache_key(parts);
        let stored = self.service.set(&key, &response, &self.options().with_ttl(ttl)).await;
        crate::metrics::record_response_cache(if stored { "stored" } else { "rejected" });
        stored
    }

    /// Whether the request's `If-None-Match` matches the stored response,
    /// i.e. the caller may answer `304 Not Modified`.
    #[must_use]
    pub fn is_not_modified(&self, parts: &RequestParts, response: &CachedResponse) -> bool {
        match (parts.header("if-none-match"), response.etag.as_deref()) {
            (Some(header), Some(etag)) => check_if_none_match(etag, header),
            _ => false,
        }
    }

    /// Drop the stored response for one request.
    pub async fn invalidate(&self, parts: &RequestParts) -> bool {
        let key = self.generate_cache_key(parts);
        self.service.del(&key, &CacheOptions::new()).await
    }

    /// Drop every stored response for `path`: all methods, users and
    /// variants. Returns the number of keys removed.
    pub async fn invalidate_by_path(&self, path: &str) -> usize {
        let pattern = key::path_pattern(&self.config.key_prefix, path);
        self.service.invalidate_by_pattern(&pattern).await
    }

    /// Drop every stored response cached for `user_id`.
    pub async fn invalidate_by_user(&self, user_id: &str) -> usize {
        let pattern = key::user_pattern(&self.config.key_prefix, user_id);
        self.service.invalidate_by_pattern(&pattern).await
    }

    fn options(&self) -> CacheOptions {
        CacheOptions::strategy(self.config.strategy)
    }

    fn rejection(&self, parts: &RequestParts, response: &CachedResponse) -> Option<&'static str> {
        if !self.should_cache(&parts.method, &parts.path, response.status, response.body.len()) {
            return Some("not cacheable");
        }
        let request_cc = parts.header("cache-control").map(parse_cache_control).unwrap_or_default();
        if request_cc.no_store {
            return Some("request no-store");
        }
        let response_cc = response.header("cache-control").map(parse_cache_control).unwrap_or_default();
        if response_cc.no_store {
            return Some("response no-store");
        }
        if response_cc.private && parts.user_id.is_none() {
            return Some("private without user");
        }
        if response_cc.shared_max_age() == Some(0) {
            return Some("max-age=0");
        }
        None
    }
}

fn is_cacheable_method(method: &str) -> bool {
    method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("HEAD")
}

mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::test_support::*;

    fn responses() -> ResponseCache {
        let (service, _) = service_with_store();
        ResponseCache::new(service)
    }

    fn ok(body: &str) -> CachedResponse {
        CachedResponse::new(200, body.as_bytes().to_vec()).with_header("Content-Type", "text/plain")
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = responses();
        let request = RequestParts::new("GET", "/api/items").with_query("page=1");
        assert!(!cache.get(&request).await.is_hit());

        assert!(cache.set(&request, ok("hello")).await);
        let lookup = cache.get(&request).await;
        let stored = lookup.response.unwrap();
        assert_eq!(stored.body, b"hello");
        assert_eq!(stored.header("content-type"), Some("text/plain"));
        assert_eq!(stored.etag, Some(generate_etag(b"hello")));
        assert!(lookup.source.is_some());
    }

    #[tokio::test]
    async fn test_existing_etag_header_is_kept() {
        let cache = responses();
        let request = RequestParts::new("GET", "/a");
        cache.set(&request, ok("x").with_header("ETag", "W/\"v1\"")).await;
        let stored = cache.get(&request).await.response.unwrap();
        assert_eq!(stored.etag.as_deref(), Some("W/\"v1\""));

        let conditional = request.clone().with_header("If-None-Match", "\"v1\"");
        assert!(cache.is_not_modified(&conditional, &stored));
        assert!(!cache.is_not_modified(&request, &stored));
    }

    #[tokio::test]
    async fn test_no_store_is_never_retrievable() {
        let cache = responses();

        let request = RequestParts::new("GET", "/a").with_header("Cache-Control", "no-store");
        assert!(!cache.set(&request, ok("secret")).await);
        assert!(!cache.get(&RequestParts::new("GET", "/a")).await.is_hit());

        let request = RequestParts::new("GET", "/b");
        assert!(!cache.set(&request, ok("secret").with_header("cache-control", "no-store")).await);
        assert!(!cache.get(&request).await.is_hit());
    }

    #[tokio::test]
    async fn test_request_no_cache_bypasses_read() {
        let cache = responses();
        let request = RequestParts::new("GET", "/a");
        assert!(cache.set(&request, ok("v")).await);

        let fresh = request.clone().with_header("cache-control", "no-cache");
        assert!(!cache.get(&fresh).await.is_hit());
        // Still there for ordinary requests
        assert!(cache.get(&request).await.is_hit());
    }

    #[tokio::test]
    async fn test_users_do_not_see_each_other() {
        let cache = responses();
        let alice = RequestParts::new("GET", "/me").with_user("alice");
        let bob = RequestParts::new("GET", "/me").with_user("bob");

        assert_ne!(cache.generate_cache_key(&alice), cache.generate_cache_key(&bob));
        assert!(cache.set(&alice, ok("alice's data")).await);
        assert!(!cache.get(&bob).await.is_hit());
        assert!(!cache.get(&RequestParts::new("GET", "/me")).await.is_hit());
        assert_eq!(cache.get(&alice).await.response.unwrap().body, b"alice's data");
    }

    #[tokio::test]
    async fn test_private_needs_a_user() {
        let cache = responses();
        let private = || ok("p").with_header("cache-control", "private, max-age=60");
        assert!(!cache.set(&RequestParts::new("GET", "/p"), private()).await);
        assert!(cache.set(&RequestParts::new("GET", "/p").with_user("u1"), private()).await);
    }

    #[tokio::test]
    async fn test_max_age_zero_rejected_and_ttl_capped() {
        let cache = responses();
        let request = RequestParts::new("GET", "/a");
        assert!(!cache.set(&request, ok("v").with_header("cache-control", "max-age=0")).await);

        assert!(cache.set(&request, ok("v").with_header("cache-control", "max-age=999999")).await);
        let key = cache.generate_cache_key(&request);
        let ttl = cache.service().get::<CachedResponse>(&key, &CacheOptions::new()).await.ttl.unwrap();
        let ceiling = cache.service().config().strategies.get(cache.config().strategy).ttl_secs;
        assert!(ttl <= ceiling);
    }

    #[tokio::test]
    async fn test_stale_response_is_dropped() {
        let cache = responses();
        let request = RequestParts::new("GET", "/a");
        let key = cache.generate_cache_key(&request);

        // Stored long ago with a short max-age, under a longer TTL
        let mut old = ok("old");
        old.max_age = Some(1);
        old.cached_at = now_millis() - 5_000;
        cache.service().set(&key, &old, &CacheOptions::ttl(60)).await;

        assert!(!cache.get(&request).await.is_hit());
        assert!(!cache.service().get::<CachedResponse>(&key, &CacheOptions::new()).await.hit);
    }

    #[test]
    fn test_should_cache_rules() {
        let cache = ResponseCache::new(memory_only());
        assert!(cache.should_cache("GET", "/api/items", 200, 10));
        assert!(cache.should_cache("head", "/api/items", 404, 10));
        assert!(!cache.should_cache("POST", "/api/items", 200, 10));
        assert!(!cache.should_cache("GET", "/api/auth/login", 200, 10));
        assert!(!cache.should_cache("GET", "/api/items", 500, 10));
        assert!(!cache.should_cache("GET", "/api/items", 200, cache.config().max_body_bytes + 1));

        let mut config = cache.config().clone();
        config.exclude_status = vec![404];
        let strict = ResponseCache::with_config(memory_only(), config);
        assert!(!strict.should_cache("GET", "/api/items", 404, 10));
    }

    #[tokio::test]
    async fn test_post_is_not_read_or_written() {
        let cache = responses();
        let request = RequestParts::new("POST", "/api/items");
        assert!(!cache.set(&request, ok("v")).await);
        assert!(!cache.get(&request).await.is_hit());
    }

    #[tokio::test]
    async fn test_invalidate_by_path_and_user() {
        let cache = responses();
        let a1 = RequestParts::new("GET", "/a").with_user("1");
        let a2 = RequestParts::new("GET", "/a").with_query("x=2").with_user("2");
        let b1 = RequestParts::new("GET", "/b").with_user("1");
        for request in [&a1, &a2, &b1] {
            assert!(cache.set(request, ok("v")).await);
        }

        assert_eq!(cache.invalidate_by_path("/a").await, 2);
        assert!(!cache.get(&a1).await.is_hit());
        assert!(cache.get(&b1).await.is_hit());

        assert_eq!(cache.invalidate_by_user("1").await, 1);
        assert!(!cache.get(&b1).await.is_hit());

        assert!(cache.set(&a1, ok("v")).await);
        assert!(cache.invalidate(&a1).await);
        assert!(!cache.get(&a1).await.is_hit());
    }

    #[test]
    fn test_body_is_base64_in_json() {
        let response = CachedResponse::new(200, vec![0, 159, 146, 150]);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["body"], "AJ+Slg==");
        let back: CachedResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back, response);
    }
}
