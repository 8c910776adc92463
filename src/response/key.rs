// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Request description and cache key derivation.
//!
//! ```text
//! {prefix}:{METHOD}:{path}:{u=<user> | anon}:{digest}
//!                                              └─ sha256(sorted query + vary headers), 16 hex
//! ```
//!
//! The user segment keeps authenticated responses apart; the digest keeps
//! keys short regardless of query length.
//!
//! `%` and `:` inside the method, path and user are percent-encoded, so every
//! key has exactly four separators after the prefix. Invalidation patterns
//! spell out all four, which keeps each `*` inside its own segment.

use std::borrow::Cow;
use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::storage::escape_glob;

/// Hex characters of the digest kept in the key.
const DIGEST_LEN: usize = 16;

/// The parts of an HTTP request that feed the cache key and policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParts {
    pub method: String,
    pub path: String,
    /// Raw query string, with or without the leading `?`
    pub query: Option<String>,
    /// Header names are stored lowercase
    pub headers: BTreeMap<String, String>,
    /// Authenticated user, if any
    pub user_id: Option<String>,
}

impl RequestParts {
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Uppercased method.
    #[must_use]
    pub fn method_upper(&self) -> String {
        self.method.to_ascii_uppercase()
    }
}

/// Derive the cache key for a request.
///
/// Deterministic: query parameter order does not matter, and header names
/// in `vary_headers` are matched case-insensitively. A vary header missing
/// from the request contributes an empty value.
#[must_use]
pub fn generate_cache_key(prefix: &str, parts: &RequestParts, vary_headers: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"q=");
    hasher.update(normalize_query(parts.query.as_deref().unwrap_or_default()).as_bytes());
    for name in vary_headers {
        let name = name.to_ascii_lowercase();
        hasher.update(b"\n");
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(parts.header(&name).unwrap_or_default().as_bytes());
    }
    let digest = hex::encode(hasher.finalize());

    format!(
        "{prefix}:{}:{}:{}:{}",
        encode_segment(&parts.method_upper()),
        encode_segment(&parts.path),
        user_segment(parts.user_id.as_deref()),
        &digest[..DIGEST_LEN]
    )
}

/// Glob matching every key for `path`, across methods, users and variants.
#[must_use]
pub fn path_pattern(prefix: &str, path: &str) -> String {
    format!("{}:*:{}:*:*", escape_glob(prefix), escape_glob(&encode_segment(path)))
}

/// Glob matching every key cached for `user_id`.
#[must_use]
pub fn user_pattern(prefix: &str, user_id: &str) -> String {
    format!(
        "{}:*:*:{}:*",
        escape_glob(prefix),
        escape_glob(&user_segment(Some(user_id)))
    )
}

fn user_segment(user_id: Option<&str>) -> String {
    match user_id {
        Some(id) => format!("u={}", encode_segment(id)),
        None => "anon".to_string(),
    }
}

/// Percent-encode the key separator and the escape character itself.
fn encode_segment(raw: &str) -> Cow<'_, str> {
    if !raw.contains([':', '%']) {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len() + 8);
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Sort `a=1&b=2` pairs and drop empty ones.
fn normalize_query(query: &str) -> String {
    let query = query.strip_prefix('?').unwrap_or(query);
    let mut pairs: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
    pairs.sort_unstable();
    pairs.join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vary() -> Vec<String> {
        vec!["accept".to_string(), "authorization".to_string()]
    }

    #[test]
    fn test_key_shape() {
        let parts = RequestParts::new("get", "/api/items");
        let key = generate_cache_key("response", &parts, &vary());
        let segments: Vec<&str> = key.split(':').collect();
        assert_eq!(segments[..4], ["response", "GET", "/api/items", "anon"]);
        assert_eq!(segments[4].len(), DIGEST_LEN);
    }

    #[test]
    fn test_query_order_is_irrelevant() {
        let a = RequestParts::new("GET", "/x").with_query("?b=2&a=1");
        let b = RequestParts::new("GET", "/x").with_query("a=1&b=2&");
        assert_eq!(
            generate_cache_key("response", &a, &vary()),
            generate_cache_key("response", &b, &vary())
        );
    }

    #[test]
    fn test_vary_headers_change_the_key() {
        let json = RequestParts::new("GET", "/x").with_header("Accept", "application/json");
        let html = RequestParts::new("GET", "/x").with_header("accept", "text/html");
        let other = RequestParts::new("GET", "/x").with_header("X-Trace", "abc");
        let plain = RequestParts::new("GET", "/x");

        let key = |p: &RequestParts| generate_cache_key("response", p, &vary());
        assert_ne!(key(&json), key(&html));
        // Headers outside the vary list are ignored
        assert_eq!(key(&other), key(&plain));
    }

    #[test]
    fn test_users_get_distinct_keys() {
        let alice = RequestParts::new("GET", "/me").with_user("alice");
        let bob = RequestParts::new("GET", "/me").with_user("bob");
        let anon = RequestParts::new("GET", "/me");
        let literal_anon = RequestParts::new("GET", "/me").with_user("anon");

        let key = |p: &RequestParts| generate_cache_key("response", p, &vary());
        assert_ne!(key(&alice), key(&bob));
        assert_ne!(key(&alice), key(&anon));
        assert_ne!(key(&literal_anon), key(&anon));
    }

    #[test]
    fn test_patterns_match_generated_keys() {
        let parts = RequestParts::new("GET", "/search?x").with_user("u*1").with_query("q=1");
        let key = generate_cache_key("response", &parts, &vary());

        let by_path = glob::Pattern::new(&path_pattern("response", "/search?x")).unwrap();
        let by_user = glob::Pattern::new(&user_pattern("response", "u*1")).unwrap();
        assert!(by_path.matches(&key));
        assert!(by_user.matches(&key));

        let other_user = glob::Pattern::new(&user_pattern("response", "u")).unwrap();
        assert!(!other_user.matches(&key));
        let other_path = glob::Pattern::new(&path_pattern("response", "/searchXx")).unwrap();
        assert!(!other_path.matches(&key));
    }

    #[test]
    fn test_separators_in_path_and_user_do_not_collide() {
        let a = RequestParts::new("GET", "/a").with_user("x:u=y");
        let b = RequestParts::new("GET", "/a:u=x").with_user("y");
        let c = RequestParts::new("GET", "/a%3Au=x").with_user("y");

        let key = |p: &RequestParts| generate_cache_key("response", p, &vary());
        assert_ne!(key(&a), key(&b));
        assert_ne!(key(&b), key(&c));
        assert_eq!(key(&b).matches(':').count(), 4);

        let by_path = glob::Pattern::new(&path_pattern("response", "/a:u=x")).unwrap();
        assert!(by_path.matches(&key(&b)));
        assert!(!by_path.matches(&key(&a)));
        assert!(!by_path.matches(&key(&c)));

        let by_user = glob::Pattern::new(&user_pattern("response", "x:u=y")).unwrap();
        assert!(by_user.matches(&key(&a)));
        assert!(!by_user.matches(&key(&b)));
    }

    #[test]
    fn test_path_pattern_stays_in_its_segment() {
        // A path spelled like a user segment must not match other paths' keys
        let anon = generate_cache_key("response", &RequestParts::new("GET", "/x"), &vary());
        let user = generate_cache_key("response", &RequestParts::new("GET", "/x").with_user("bob"), &vary());

        assert!(!glob::Pattern::new(&path_pattern("response", "anon")).unwrap().matches(&anon));
        assert!(!glob::Pattern::new(&path_pattern("response", "u=bob")).unwrap().matches(&user));
        assert!(!glob::Pattern::new(&user_pattern("response", "x")).unwrap().matches(&user));
    }
}
