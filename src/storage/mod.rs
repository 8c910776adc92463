// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote tier backends.
//!
//! - [`redis::RedisStore`]: production backend
//! - [`memory::InMemoryStore`]: DashMap stand-in for tests and local runs
//!
//! Both speak raw bytes through [`traits::RemoteStore`].

pub mod memory;
pub mod redis;
pub mod traits;

/// Escape glob metacharacters so `literal` only matches itself.
///
/// Uses bracket classes (`*` → `[*]`), which Redis `MATCH` and the `glob`
/// crate both understand. A lone `]` is already literal in both.
#[must_use]
pub fn escape_glob(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        match c {
            '*' | '?' | '[' => {
                out.push('[');
                out.push(c);
                out.push(']');
            }
            _ => out.push(c),
        }
    }
    out
}
