// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process [`RemoteStore`] for tests and single-node runs.
//!
//! Behaves like a tiny Redis: byte values, millisecond TTLs with lazy expiry,
//! glob key matching. [`InMemoryStore::set_available`] simulates an outage;
//! while unavailable every call (including `connect`) fails with a
//! connection error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{KeyTtl, RemoteStore, StorageError};

pub struct InMemoryStore {
    data: DashMap<String, (Vec<u8>, Option<Instant>)>,
    available: AtomicBool,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Get current item count (including expired entries not yet reaped)
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clear all items
    pub fn clear(&self) {
        self.data.clear();
    }

    /// Simulate the server going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StorageError::Connection("in-memory store unavailable".into()))
        }
    }

    /// Live value for `key`, reaping it if expired.
    fn live(&self, key: &str) -> Option<(Vec<u8>, Option<Instant>)> {
        let now = Instant::now();
        let expired = match self.data.get(key) {
            None => return None,
            Some(slot) => match slot.1 {
                Some(deadline) if deadline <= now => true,
                _ => return Some(slot.value().clone()),
            },
        };
        if expired {
            self.data.remove_if(key, |_, (_, deadline)| deadline.is_some_and(|d| d <= now));
        }
        None
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> Result<(), StorageError> {
        self.check()
    }

    async fn disconnect(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.check()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.check()?;
        Ok(self.live(key).map(|(value, _)| value))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StorageError> {
        self.check()?;
        let deadline = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.data.insert(key.to_string(), (value.to_vec(), deadline));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, StorageError> {
        self.check()?;
        let existed = self.live(key).is_some();
        self.data.remove(key);
        Ok(existed)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.check()?;
        Ok(self.live(key).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StorageError> {
        self.check()?;
        Ok(match self.live(key) {
            None => KeyTtl::Missing,
            Some((_, None)) => KeyTtl::Persistent,
            Some((_, Some(deadline))) => {
                KeyTtl::Expires(deadline.saturating_duration_since(Instant::now()))
            }
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError> {
        self.check()?;
        if self.live(key).is_none() {
            return Ok(false);
        }
        match self.data.get_mut(key) {
            Some(mut slot) => {
                slot.1 = Instant::now().checked_add(ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StorageError> {
        self.check()?;
        let matcher = glob::Pattern::new(pattern)
            .map_err(|e| StorageError::Backend(format!("invalid pattern '{}': {}", pattern, e)))?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .data
            .iter()
            .filter(|e| e.value().1.map_or(true, |d| d > now))
            .filter(|e| matcher.matches(e.key()))
            .map(|e| e.key().clone())
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }

    async fn flushdb(&self) -> Result<(), StorageError> {
        self.check()?;
        self.data.clear();
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("len", &self.len())
            .field("available", &self.is_available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = InMemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = InMemoryStore::new();
        store.set("item-1", b"hello", None).await.unwrap();

        let result = store.get("item-1").await.unwrap();
        assert_eq!(result.as_deref(), Some(&b"hello"[..]));
        assert_eq!(store.ttl("item-1").await.unwrap(), KeyTtl::Persistent);
    }

    #[tokio::test]
    async fn test_get_nonexistent_returns_none() {
        let store = InMemoryStore::new();
        assert!(store.get("nonexistent").await.unwrap().is_none());
        assert_eq!(store.ttl("nonexistent").await.unwrap(), KeyTtl::Missing);
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let store = InMemoryStore::new();
        store.set("to-delete", b"x", None).await.unwrap();

        assert!(store.del("to-delete").await.unwrap());
        assert!(!store.del("to-delete").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = InMemoryStore::new();
        store.set("same-id", b"v1", None).await.unwrap();
        store.set("same-id", b"v2", None).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("same-id").await.unwrap().unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_ttl_expiry_is_lazy() {
        let store = InMemoryStore::new();
        store.set("short", b"x", Some(Duration::from_millis(30))).await.unwrap();
        assert!(matches!(store.ttl("short").await.unwrap(), KeyTtl::Expires(_)));

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(!store.exists("short").await.unwrap());
        assert!(store.get("short").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_expire_rearms_ttl() {
        let store = InMemoryStore::new();
        store.set("k", b"x", None).await.unwrap();

        assert!(store.expire("k", Duration::from_secs(10)).await.unwrap());
        let secs = store.ttl("k").await.unwrap().as_secs().unwrap();
        assert!(secs <= 10 && secs >= 9);

        assert!(!store.expire("missing", Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_glob() {
        let store = InMemoryStore::new();
        for key in ["user:1", "user:2", "session:1"] {
            store.set(key, b"x", None).await.unwrap();
        }

        assert_eq!(store.keys("user:*").await.unwrap(), vec!["user:1", "user:2"]);
        assert_eq!(store.keys("*:1").await.unwrap(), vec!["session:1", "user:1"]);
        assert!(store.keys("nothing*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_defaults_via_trait() {
        let store = InMemoryStore::new();
        let items: Vec<(String, Vec<u8>)> = (0..5)
            .map(|i| (format!("batch-{}", i), vec![i as u8]))
            .collect();

        store.mset(&items, Some(Duration::from_secs(60))).await.unwrap();
        assert_eq!(store.len(), 5);

        let keys = vec!["batch-0".to_string(), "missing".to_string(), "batch-4".to_string()];
        let values = store.mget(&keys).await.unwrap();
        assert_eq!(values, vec![Some(vec![0]), None, Some(vec![4])]);

        assert_eq!(store.del_many(&keys).await.unwrap(), 2);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_fails_with_connection_error() {
        let store = InMemoryStore::new();
        store.set_available(false);

        let err = store.get("k").await.unwrap_err();
        assert!(err.is_connection_error());
        assert!(store.connect().await.unwrap_err().is_connection_error());

        store.set_available(true);
        assert!(store.connect().await.is_ok());
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_flush() {
        let store = InMemoryStore::new();
        for i in 0..10 {
            store.set(&format!("item-{}", i), b"x", None).await.unwrap();
        }
        store.flushdb().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryStore::new());
        let mut handles = vec![];

        // Spawn 10 tasks that each insert 10 items
        for batch in 0..10 {
            let store_clone = store.clone();
            let handle = tokio::spawn(async move {
                for i in 0..10 {
                    let key = format!("batch-{}-item-{}", batch, i);
                    store_clone.set(&key, b"x", None).await.unwrap();
                }
            });
            handles.push(handle);
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), 100);
    }
}
