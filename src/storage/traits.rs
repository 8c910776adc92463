// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::time::Duration;

use async_trait::async_trait;

pub use crate::error::StorageError;

/// Remaining lifetime of a remote key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist
    Missing,
    /// Key exists without expiry
    Persistent,
    /// Key expires after this long
    Expires(Duration),
}

impl KeyTtl {
    /// Map a Redis `PTTL` reply (`-2` missing, `-1` no expiry).
    #[must_use]
    pub fn from_pttl(millis: i64) -> Self {
        match millis {
            -2 => Self::Missing,
            m if m < 0 => Self::Persistent,
            m => Self::Expires(Duration::from_millis(m as u64)),
        }
    }

    /// Whole seconds left, rounded up. `None` unless the key expires.
    #[must_use]
    pub fn as_secs(&self) -> Option<u64> {
        match self {
            Self::Expires(d) => Some((d.as_millis().div_ceil(1000)) as u64),
            _ => None,
        }
    }
}

/// Raw byte-level remote backend.
///
/// Implementations talk to the store directly and report every failure.
/// Readiness gating, timeouts, events and reconnection live one layer up in
/// [`RemoteClient`](crate::client::RemoteClient).
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Backend label for logs and metrics.
    fn name(&self) -> &'static str {
        "remote"
    }

    /// Establish (or re-establish) the connection.
    async fn connect(&self) -> Result<(), StorageError>;

    /// Apply server-side settings once connected.
    ///
    /// Default: nothing to configure.
    async fn configure(&self, _eviction_policy: &str, _keyspace_events: &str) -> Result<(), StorageError> {
        Ok(())
    }

    /// Drop the connection.
    async fn disconnect(&self) -> Result<(), StorageError>;

    async fn ping(&self) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write `value`; `ttl` of `None` means no expiry.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StorageError>;

    /// Returns whether the key existed.
    async fn del(&self, key: &str) -> Result<bool, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StorageError>;

    /// Re-arm a key's TTL. Returns whether the key existed.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError>;

    /// Keys matching a glob pattern (`*`, `?`, `[...]`).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StorageError>;

    /// Remove every key this store owns.
    async fn flushdb(&self) -> Result<(), StorageError>;

    /// Batch read. Default implementation falls back to sequential gets.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// Batch write with a shared TTL. Default implementation falls back to sequential sets.
    async fn mset(&self, items: &[(String, Vec<u8>)], ttl: Option<Duration>) -> Result<(), StorageError> {
        for (key, value) in items {
            self.set(key, value, ttl).await?;
        }
        Ok(())
    }

    /// Delete many keys, returning how many existed.
    async fn del_many(&self, keys: &[String]) -> Result<usize, StorageError> {
        let mut removed = 0;
        for key in keys {
            if self.del(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
