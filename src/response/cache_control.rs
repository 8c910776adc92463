// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `Cache-Control` directive parsing.

use serde::Serialize;

/// Directives relevant to a shared response cache.
///
/// Unknown directives are ignored. When a directive repeats, the first
/// occurrence wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheControl {
    pub no_cache: bool,
    pub no_store: bool,
    pub must_revalidate: bool,
    pub private: bool,
    pub public: bool,
    /// `max-age` in seconds
    pub max_age: Option<u64>,
    /// `s-maxage` in seconds; overrides `max-age` for shared caches
    pub s_maxage: Option<u64>,
}

impl CacheControl {
    /// Freshness lifetime as seen by a shared cache.
    #[must_use]
    pub fn shared_max_age(&self) -> Option<u64> {
        self.s_maxage.or(self.max_age)
    }

    /// `no-store` or `no-cache`: the request wants a fresh answer.
    #[must_use]
    pub fn bypasses_read(&self) -> bool {
        self.no_store || self.no_cache
    }
}

/// Parse a `Cache-Control` header value.
///
/// Directive names are case-insensitive; values may be quoted. A `max-age`
/// that is not a non-negative integer is treated as absent.
#[must_use]
pub fn parse_cache_control(header: &str) -> CacheControl {
    let mut cc = CacheControl::default();

    for directive in header.split(',') {
        let directive = directive.trim();
        if directive.is_empty() {
            continue;
        }
        let (name, value) = match directive.split_once('=') {
            Some((n, v)) => (n.trim(), Some(v.trim().trim_matches('"'))),
            None => (directive, None),
        };

        match name.to_ascii_lowercase().as_str() {
            "no-cache" => cc.no_cache = true,
            "no-store" => cc.no_store = true,
            "must-revalidate" | "proxy-revalidate" => cc.must_revalidate = true,
            "private" => cc.private = true,
            "public" => cc.public = true,
            "max-age" if cc.max_age.is_none() => cc.max_age = value.and_then(parse_seconds),
            "s-maxage" if cc.s_maxage.is_none() => cc.s_maxage = value.and_then(parse_seconds),
            _ => {}
        }
    }

    cc
}

fn parse_seconds(value: &str) -> Option<u64> {
    value.parse().ok()
}
