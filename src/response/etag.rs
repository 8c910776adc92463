// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! ETag generation and `If-None-Match` evaluation.
//!
//! This only decides match / no-match; answering `304 Not Modified` is up
//! to the caller.

use sha2::{Digest, Sha256};

/// Strong ETag for a body: the quoted first 128 bits of its SHA-256, hex.
#[must_use]
pub fn generate_etag(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("\"{}\"", hex::encode(&digest[..16]))
}

/// Whether `if_none_match` matches `etag` under the weak comparison
/// function (RFC 9110 §13.1.2).
///
/// Accepts `*`, a single tag, or a comma-separated list. Either side may
/// carry the `W/` prefix, and unquoted tags are tolerated.
#[must_use]
pub fn check_if_none_match(etag: &str, if_none_match: &str) -> bool {
    let header = if_none_match.trim();
    if header.is_empty() {
        return false;
    }
    if header == "*" {
        return true;
    }

    let ours = opaque_tag(etag);
    header.split(',').map(opaque_tag).any(|theirs| !theirs.is_empty() && theirs == ours)
}

fn opaque_tag(tag: &str) -> &str {
    let tag = tag.trim();
    let tag = tag.strip_prefix("W/").unwrap_or(tag);
    tag.trim_matches('"')
}
