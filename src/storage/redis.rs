// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis backend for the remote tier.
//!
//! Values are opaque byte strings (the service stores JSON envelopes,
//! optionally zstd-compressed). Keys are namespaced with an optional prefix
//! so several applications can share one Redis instance:
//!
//! ```text
//! prefix "myapp:"   user:42:profile  →  myapp:user:42:profile
//! ```
//!
//! Key enumeration uses cursor `SCAN … MATCH`, never `KEYS`, so pattern
//! invalidation does not block the server on large keyspaces. With a prefix
//! set, `flushdb` only removes the prefixed namespace.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::{cmd, pipe, Client};
use tracing::{debug, warn};

use super::escape_glob;
use super::traits::{KeyTtl, RemoteStore, StorageError};

/// `SCAN` page size hint.
const SCAN_COUNT: usize = 500;

/// Keys per `DEL` when flushing a prefixed namespace.
const DELETE_CHUNK: usize = 500;

pub struct RedisStore {
    client: Client,
    /// `None` until `connect()` succeeds, and again after `disconnect()`
    connection: RwLock<Option<ConnectionManager>>,
    /// Optional key prefix for namespacing (e.g., "myapp:" → "myapp:user:42")
    prefix: String,
}

impl RedisStore {
    /// Create a store without connecting.
    ///
    /// Only the URL is validated here; call [`RemoteStore::connect`] (or let
    /// [`RemoteClient`](crate::client::RemoteClient) do it) to open the connection.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use tiered_cache::storage::redis::RedisStore;
    /// # use tiered_cache::storage::traits::RemoteStore;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// // Keys will be prefixed: "myapp:user:42", "myapp:response:GET:/"
    /// let store = RedisStore::new("redis://localhost", Some("myapp:"))?;
    /// store.connect().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(connection_string: &str, prefix: Option<&str>) -> Result<Self, StorageError> {
        let client = Client::open(connection_string)
            .map_err(|e| StorageError::Backend(format!("invalid Redis URL: {}", e)))?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            prefix: prefix.unwrap_or("").to_string(),
        })
    }

    /// Apply the prefix to a key.
    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    /// Strip the prefix from a key (for returning clean keys from SCAN).
    #[inline]
    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            key
        } else {
            key.strip_prefix(&self.prefix).unwrap_or(key)
        }
    }

    /// Get the configured prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether a connection is currently held.
    pub fn is_connected(&self) -> bool {
        self.connection.read().is_some()
    }

    /// Clone of the live connection manager.
    ///
    /// The lock is released before any await point.
    fn conn(&self) -> Result<ConnectionManager, StorageError> {
        self.connection.read().clone().ok_or(StorageError::NotReady)
    }

    /// Raw SCAN over already-prefixed patterns. Returns full (prefixed) keys.
    async fn scan_raw(&self, raw_pattern: &str) -> Result<Vec<String>, StorageError> {
        let mut conn = self.conn()?;
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(raw_pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once across pages
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn connect(&self) -> Result<(), StorageError> {
        let manager = ConnectionManager::new(self.client.clone()).await?;
        *self.connection.write() = Some(manager);
        debug!(prefix = %self.prefix, "Redis connection established");
        Ok(())
    }

    async fn configure(&self, eviction_policy: &str, keyspace_events: &str) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        let mut first_error = None;

        for (param, value) in [
            ("maxmemory-policy", eviction_policy),
            ("notify-keyspace-events", keyspace_events),
        ] {
            let result: Result<(), redis::RedisError> = cmd("CONFIG")
                .arg("SET")
                .arg(param)
                .arg(value)
                .query_async(&mut conn)
                .await;
            if let Err(e) = result {
                warn!(param, value, error = %e, "Redis rejected CONFIG SET");
                first_error.get_or_insert(StorageError::from(e));
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn disconnect(&self) -> Result<(), StorageError> {
        // Dropping the last manager clone closes the socket
        self.connection.write().take();
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        let _: String = cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let mut conn = self.conn()?;
        let value: Option<Vec<u8>> = cmd("GET")
            .arg(self.prefixed_key(key))
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        let mut command = cmd("SET");
        command.arg(self.prefixed_key(key)).arg(value);
        if let Some(ttl) = ttl {
            command.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        let _: () = command.query_async(&mut conn).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn()?;
        let removed: i64 = cmd("DEL")
            .arg(self.prefixed_key(key))
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn()?;
        let count: i64 = cmd("EXISTS")
            .arg(self.prefixed_key(key))
            .query_async(&mut conn)
            .await?;
        Ok(count > 0)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StorageError> {
        let mut conn = self.conn()?;
        let millis: i64 = cmd("PTTL")
            .arg(self.prefixed_key(key))
            .query_async(&mut conn)
            .await?;
        Ok(KeyTtl::from_pttl(millis))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError> {
        let mut conn = self.conn()?;
        let applied: i64 = cmd("PEXPIRE")
            .arg(self.prefixed_key(key))
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StorageError> {
        let raw_pattern = format!("{}{}", escape_glob(&self.prefix), pattern);
        let keys = self.scan_raw(&raw_pattern).await?;
        Ok(keys.iter().map(|k| self.strip_prefix(k).to_string()).collect())
    }

    async fn flushdb(&self) -> Result<(), StorageError> {
        if self.prefix.is_empty() {
            let mut conn = self.conn()?;
            let _: () = cmd("FLUSHDB").query_async(&mut conn).await?;
            return Ok(());
        }

        // Shared instance: only remove our namespace
        let keys = self.scan_raw(&format!("{}*", escape_glob(&self.prefix))).await?;
        let mut conn = self.conn()?;
        for chunk in keys.chunks(DELETE_CHUNK) {
            let _: i64 = cmd("DEL").arg(chunk).query_async(&mut conn).await?;
        }
        debug!(prefix = %self.prefix, removed = keys.len(), "Flushed prefixed namespace");
        Ok(())
    }

    /// Single `MGET` round trip.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
        if keys.is_empty() {
            return Ok(vec![]);
        }
        let mut conn = self.conn()?;
        let prefixed: Vec<String> = keys.iter().map(|k| self.prefixed_key(k)).collect();
        let values: Vec<Option<Vec<u8>>> = cmd("MGET").arg(&prefixed).query_async(&mut conn).await?;
        Ok(values)
    }

    /// Pipelined `SET … PX` per item (non-atomic across keys).
    async fn mset(&self, items: &[(String, Vec<u8>)], ttl: Option<Duration>) -> Result<(), StorageError> {
        if items.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let mut pipeline = pipe();
        for (key, value) in items {
            let command = pipeline.cmd("SET").arg(self.prefixed_key(key)).arg(value.as_slice());
            if let Some(ttl) = ttl {
                command.arg("PX").arg(ttl.as_millis().max(1) as u64);
            }
            command.ignore();
        }
        pipeline.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Single multi-key `DEL`.
    async fn del_many(&self, keys: &[String]) -> Result<usize, StorageError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let prefixed: Vec<String> = keys.iter().map(|k| self.prefixed_key(k)).collect();
        let removed: i64 = cmd("DEL").arg(&prefixed).query_async(&mut conn).await?;
        Ok(removed.max(0) as usize)
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("prefix", &self.prefix)
            .field("connected", &self.is_connected())
            .finish()
    }
}
