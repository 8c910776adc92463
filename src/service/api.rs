// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache operations: reads, writes, cache-aside, invalidation, warming.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::entry::{CacheEntry, CacheResult, CacheSource};
use crate::options::{CacheOptions, ResolvedOptions};

use super::CacheService;

impl CacheService {
    // ═══════════════════════════════════════════════════════════════════════
    // API: Reads & Writes
    // ═══════════════════════════════════════════════════════════════════════

    /// Read `key`, memory tier first, then Redis.
    ///
    /// A Redis hit is written back to the memory tier with its remaining
    /// TTL. A stored value that does not deserialize into `T` counts as a
    /// miss. Never fails: an unavailable tier is skipped.
    ///
    /// `source` is [`CacheSource::Fallback`] when the memory tier answered
    /// while Redis was enabled for this key but not serving.
    #[tracing::instrument(skip(self, options), level = "debug")]
    pub async fn get<T: DeserializeOwned>(&self, key: &str, options: &CacheOptions) -> CacheResult<T> {
        let _timer = crate::metrics::LatencyTimer::new("all", "get");
        let resolved = options.resolve(&self.inner.config);
        let counters = &self.inner.counters;

        if resolved.use_memory {
            if let Some(entry) = self.inner.memory.get_entry(key) {
                let source = if resolved.use_redis && !self.remote_ready() {
                    counters.fallback_hits.fetch_add(1, Ordering::Relaxed);
                    CacheSource::Fallback
                } else {
                    CacheSource::Memory
                };
                if let Some(result) = typed_hit(entry, source) {
                    counters.hits.fetch_add(1, Ordering::Relaxed);
                    counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                    crate::metrics::record_operation("all", "get", source.as_str());
                    return result;
                }
            }
        }

        if resolved.use_redis {
            if let Some(entry) = self.remote_entry(key).await {
                if resolved.use_memory {
                    self.inner.memory.set_entry(entry.clone());
                }
                if let Some(result) = typed_hit(entry, CacheSource::Redis) {
                    counters.hits.fetch_add(1, Ordering::Relaxed);
                    counters.redis_hits.fetch_add(1, Ordering::Relaxed);
                    crate::metrics::record_operation("all", "get", "redis");
                    return result;
                }
            }
        }

        counters.misses.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_operation("all", "get", "miss");
        CacheResult::miss()
    }

    /// Write `value` to every enabled tier.
    ///
    /// TTL comes from `options.ttl`, else the strategy, else
    /// `default_ttl_secs`. Returns `true` if at least one tier stored it.
    #[tracing::instrument(skip(self, value, options), level = "debug")]
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, options: &CacheOptions) -> bool {
        let _timer = crate::metrics::LatencyTimer::new("all", "set");
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "Cache value failed to serialize");
                crate::metrics::record_error("all", "set", "serialization");
                return false;
            }
        };
        let resolved = options.resolve(&self.inner.config);
        let stored = self.write_entry(key, value, &resolved).await;
        if stored {
            self.inner.counters.sets.fetch_add(1, Ordering::Relaxed);
        }
        stored
    }

    /// Remove `key` from every enabled tier. Returns `true` if any tier held it.
    #[tracing::instrument(skip(self, options), level = "debug")]
    pub async fn del(&self, key: &str, options: &CacheOptions) -> bool {
        let resolved = options.resolve(&self.inner.config);
        let mut removed = false;

        if resolved.use_memory {
            removed |= self.inner.memory.del(key);
        }
        if resolved.use_redis {
            if let Some(remote) = &self.inner.remote {
                removed |= remote.del(key).await;
            }
        }
        if removed {
            self.inner.counters.deletes.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    // ═══════════════════════════════════════════════════════════════════════
    // API: Cache-aside
    // ═══════════════════════════════════════════════════════════════════════

    /// Return the cached value, or run `producer`, cache its result and
    /// return it.
    ///
    /// Concurrent misses on the same key share a single producer call; every
    /// waiting caller receives a clone of its result. A producer error is
    /// returned unchanged to all of them and nothing is cached.
    ///
    /// The flight leader reads the cache again before producing, so a caller
    /// whose miss raced a just-completed flight gets the stored value.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use tiered_cache::{CacheService, CacheOptions, CacheStrategy};
    /// # async fn example(cache: &CacheService) -> Result<(), String> {
    /// let summary: String = cache
    ///     .get_or_set(
    ///         "ai:summary:doc-17",
    ///         || async { Ok::<_, String>("expensive LLM output".to_string()) },
    ///         &CacheOptions::strategy(CacheStrategy::AiResponse),
    ///     )
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    #[tracing::instrument(skip(self, producer, options), level = "debug")]
    pub async fn get_or_set<T, E, F, Fut>(&self, key: &str, producer: F, options: &CacheOptions) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get::<T>(key, options).await.into_value() {
            crate::metrics::record_get_or_set("hit");
            return Ok(value);
        }

        let (result, role) = self
            .inner
            .flights
            .run(key, move || async move {
                // A flight that finished after our miss may already have stored it
                if let Some(value) = self.get::<T>(key, options).await.into_value() {
                    return Ok(value);
                }
                self.inner.counters.producer_calls.fetch_add(1, Ordering::Relaxed);
                let result = producer().await;
                if let Ok(value) = &result {
                    self.set(key, value, options).await;
                }
                result
            })
            .await;

        if role == super::singleflight::Role::Follower {
            self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
        }
        crate::metrics::record_get_or_set(role.as_str());
        if result.is_err() {
            debug!(key, "Producer failed, nothing cached");
        }
        result
    }

    /// Populate `key` in the background.
    ///
    /// Returns immediately; the task resolves to whether the value was
    /// stored. Producer errors are logged, never cached.
    pub fn warm<T, E, F, Fut>(&self, key: impl Into<String>, producer: F, options: CacheOptions) -> JoinHandle<bool>
    where
        T: Serialize + Send + Sync + 'static,
        E: std::fmt::Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let service = self.clone();
        let key = key.into();
        tokio::spawn(async move {
            service.inner.counters.producer_calls.fetch_add(1, Ordering::Relaxed);
            match producer().await {
                Ok(value) => {
                    let stored = service.set(&key, &value, &options).await;
                    crate::metrics::record_warm(if stored { "success" } else { "not_stored" });
                    debug!(key = %key, stored, "Cache warmed");
                    stored
                }
                Err(e) => {
                    crate::metrics::record_warm("error");
                    warn!(key = %key, error = %e, "Cache warm producer failed");
                    false
                }
            }
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // API: Invalidation
    // ═══════════════════════════════════════════════════════════════════════

    /// Remove every key matching a glob (`*`, `?`, `[...]`) from both tiers.
    ///
    /// Returns the number of distinct keys removed; a key held by both tiers
    /// counts once. Redis keys are enumerated with `SCAN`, not an index.
    ///
    /// Keys that expire between `SCAN` and `DEL` are not counted, so for
    /// keys seen by both tiers the count is the larger of the two tiers'
    /// removals.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> usize {
        let mut scanned: BTreeSet<String> = BTreeSet::new();
        let mut remote_removed = 0;

        if let Some(remote) = &self.inner.remote {
            let keys = remote.keys(pattern).await;
            if !keys.is_empty() {
                remote_removed = remote.del_many(&keys).await;
                scanned.extend(keys);
            }
        }

        let mut shared_removed = 0;
        let mut memory_only_removed = 0;
        for key in self.inner.memory.keys_matching(pattern) {
            if self.inner.memory.del(&key) {
                if scanned.contains(&key) {
                    shared_removed += 1;
                } else {
                    memory_only_removed += 1;
                }
            }
        }

        let count = remote_removed.max(shared_removed) + memory_only_removed;
        self.inner.counters.invalidated.fetch_add(count as u64, Ordering::Relaxed);
        crate::metrics::record_invalidation(count);
        if count > 0 {
            info!(pattern, removed = count, "Invalidated cache keys");
        }
        count
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════════

    async fn write_entry(&self, key: &str, value: Value, resolved: &ResolvedOptions) -> bool {
        if !resolved.uses_any_tier() {
            return false;
        }
        let entry = CacheEntry::new(key, value, Some(resolved.ttl_secs))
            .with_tags(resolved.tags.clone())
            .with_metadata(resolved.metadata.clone());

        let mut stored = false;
        if resolved.use_redis {
            if let Some(remote) = &self.inner.remote {
                match self.encode_entry(&entry, resolved.compression) {
                    Ok(bytes) => {
                        stored |= remote
                            .set(key, &bytes, Some(Duration::from_secs(resolved.ttl_secs)))
                            .await;
                    }
                    Err(e) => {
                        warn!(key, error = %e, "Cache entry failed to encode");
                        crate::metrics::record_error("redis", "set", "serialization");
                    }
                }
            }
        }
        if resolved.use_memory {
            stored |= self.inner.memory.set_entry(entry);
        }
        stored
    }

    /// Decoded, unexpired Redis entry for `key`.
    async fn remote_entry(&self, key: &str) -> Option<CacheEntry<Value>> {
        let remote = self.inner.remote.as_ref()?;
        let bytes = remote.get(key).await?;
        match self.decode_entry(&bytes) {
            Ok(entry) if !entry.is_expired() => Some(entry),
            Ok(_) => None,
            Err(e) => {
                warn!(key, error = %e, "Undecodable Redis entry, treating as miss");
                crate::metrics::record_error("redis", "get", "serialization");
                None
            }
        }
    }
}

/// Convert a stored entry into a typed hit; `None` if the shape does not fit.
fn typed_hit<T: DeserializeOwned>(entry: CacheEntry<Value>, source: CacheSource) -> Option<CacheResult<T>> {
    let key = entry.key.clone();
    match serde_json::from_value::<T>(entry.value.clone()) {
        Ok(value) => Some(CacheResult::hit(entry.map(|_| value), source)),
        Err(e) => {
            warn!(key = %key, source = %source, error = %e, "Cached value has unexpected shape");
            None
        }
    }
}
