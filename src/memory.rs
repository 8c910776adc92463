// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process memory tier.
//!
//! Bounded, TTL-expiring store in front of Redis. Every operation is
//! synchronous and never fails loudly: capacity and serialization problems
//! surface as `false`/`None`.
//!
//! # Expiry
//!
//! ```text
//!   set(k, v, ttl) ──► deadline = now + ttl
//!                            │
//!        ┌───────────────────┴────────────────────┐
//!        ▼                                        ▼
//!   get(k) after deadline                 sweeper tick (check_period)
//!   → remove, emit Expire, emit Miss      → purge_expired(), emit Expire
//! ```
//!
//! # Capacity
//!
//! At `max_keys` the oldest-inserted entry is evicted (an overwrite counts as
//! a fresh insert) and an `Evict` event is emitted. Insertion order is kept
//! in a side queue of `(key, seq)` records; a record whose sequence number no
//! longer matches the live entry is stale and skipped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::config::MemoryConfig;
use crate::entry::{expiry_after, now_millis, CacheEntry, MAX_TTL_SECS};
use crate::events::{CacheEvent, CacheEventKind, EventListeners, EventSource, ListenerId};

const TIER: &str = "memory";

struct Slot {
    entry: CacheEntry<Value>,
    /// `None` when the deadline lies past what `Instant` can represent
    deadline: Option<Instant>,
    seq: u64,
}

impl Slot {
    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}

/// Memory tier counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub expirations: u64,
    pub evictions: u64,
    /// Live entry count (may include not-yet-swept expired entries)
    pub keys: usize,
    pub max_keys: usize,
    /// hits / (hits + misses), 0.0 before any read
    pub hit_rate: f64,
}

/// Bounded in-process cache with TTL expiry.
pub struct MemoryCache {
    entries: DashMap<String, Slot>,
    /// Insertion order for eviction (oldest first)
    order: Mutex<VecDeque<(String, u64)>>,
    next_seq: AtomicU64,
    max_keys: usize,
    default_ttl_secs: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
    listeners: EventListeners,
}

impl MemoryCache {
    /// Create a cache bounded to `max_keys` entries.
    #[must_use]
    pub fn new(max_keys: usize, default_ttl_secs: u64) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            next_seq: AtomicU64::new(0),
            max_keys,
            default_ttl_secs: default_ttl_secs.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            listeners: EventListeners::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(config.max_keys, config.default_ttl_secs)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════════

    /// Value for `key`, or `None` if absent or expired.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_entry(key).map(|entry| entry.value)
    }

    /// Typed read. A value that does not deserialize into `T` is a miss.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key, error = %e, "Memory cache value has unexpected shape");
                None
            }
        }
    }

    /// Full entry for `key`, with hit/miss accounting.
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry<Value>> {
        let now = Instant::now();
        let found = self.entries.get(key).map(|slot| {
            if slot.is_expired(now) {
                None
            } else {
                Some(slot.entry.clone())
            }
        });

        match found {
            Some(Some(entry)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_operation(TIER, "get", "hit");
                self.emit(CacheEventKind::Hit, key, "get");
                Some(entry)
            }
            Some(None) => {
                self.expire_now(key, now);
                self.record_miss(key);
                None
            }
            None => {
                self.record_miss(key);
                None
            }
        }
    }

    /// Whether a live entry exists. Does not touch hit/miss counters.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries.get(key).is_some_and(|slot| !slot.is_expired(now))
    }

    /// All live keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| slot.key().clone())
            .collect()
    }

    /// Live keys matching a glob (`*`, `?`, `[...]`).
    ///
    /// An invalid pattern matches nothing.
    #[must_use]
    pub fn keys_matching(&self, pattern: &str) -> Vec<String> {
        let pattern = match glob::Pattern::new(pattern) {
            Ok(p) => p,
            Err(e) => {
                warn!(pattern, error = %e, "Invalid key pattern");
                return Vec::new();
            }
        };
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|slot| !slot.is_expired(now) && pattern.matches(slot.key()))
            .map(|slot| slot.key().clone())
            .collect()
    }

    /// Batch read; one result per key, in order.
    pub fn mget<S: AsRef<str>>(&self, keys: &[S]) -> Vec<Option<Value>> {
        crate::metrics::record_batch_size(TIER, keys.len());
        keys.iter().map(|k| self.get(k.as_ref())).collect()
    }

    /// Remaining TTL in whole seconds (rounded up), `None` if absent.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let slot = self.entries.get(key)?;
        if slot.is_expired(now) {
            return None;
        }
        match slot.deadline {
            Some(deadline) => Some((deadline - now).as_millis().div_ceil(1000) as u64),
            None => slot.entry.remaining_ttl(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Writes
    // ═══════════════════════════════════════════════════════════════════════

    /// Insert or overwrite. `ttl` of `None` or `Some(0)` uses the tier default.
    pub fn set(&self, key: &str, value: Value, ttl_secs: Option<u64>) -> bool {
        let ttl = ttl_secs.filter(|t| *t > 0).unwrap_or(self.default_ttl_secs);
        self.set_entry(CacheEntry::new(key, value, Some(ttl)))
    }

    /// Typed write. A value that fails to serialize is not stored.
    pub fn set_as<T: Serialize>(&self, key: &str, value: &T, ttl_secs: Option<u64>) -> bool {
        match serde_json::to_value(value) {
            Ok(v) => self.set(key, v, ttl_secs),
            Err(e) => {
                warn!(key, error = %e, "Memory cache value failed to serialize");
                crate::metrics::record_error(TIER, "set", "serialization");
                false
            }
        }
    }

    /// Store a prepared entry, keeping its `created_at` and expiry.
    ///
    /// Used for backfill from Redis. An entry without expiry gets the tier
    /// default; an entry already expired is rejected.
    pub fn set_entry(&self, mut entry: CacheEntry<Value>) -> bool {
        if self.max_keys == 0 {
            crate::metrics::record_operation(TIER, "set", "rejected");
            return false;
        }

        let now_ms = now_millis();
        let expires_at = match entry.expires_at {
            Some(exp) => exp,
            None => {
                let exp = expiry_after(now_ms, self.default_ttl_secs);
                entry.ttl_seconds = Some(self.default_ttl_secs);
                entry.expires_at = Some(exp);
                exp
            }
        };
        let left_ms = expires_at.saturating_sub(now_ms);
        if left_ms <= 0 {
            return false;
        }
        let deadline = Instant::now().checked_add(Duration::from_millis(left_ms as u64));

        let key = entry.key.clone();
        let evicted = self.make_room(&key);
        if self.entries.len() >= self.max_keys && !self.entries.contains_key(&key) {
            crate::metrics::record_operation(TIER, "set", "rejected");
            return false;
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(key.clone(), Slot { entry, deadline, seq });
        self.track_insert(key.clone(), seq);

        self.sets.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_operation(TIER, "set", "success");
        crate::metrics::set_memory_keys(self.entries.len());

        if !evicted.is_empty() {
            self.evictions.fetch_add(evicted.len() as u64, Ordering::Relaxed);
            crate::metrics::record_eviction(TIER, evicted.len());
            for old in &evicted {
                self.emit(CacheEventKind::Evict, old, "set");
            }
        }
        self.emit(CacheEventKind::Set, &key, "set");
        true
    }

    /// Batch write with a shared TTL. Returns `true` only if every entry was stored.
    pub fn mset<I>(&self, items: I, ttl_secs: Option<u64>) -> bool
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut all = true;
        let mut count = 0;
        for (key, value) in items {
            all &= self.set(&key, value, ttl_secs);
            count += 1;
        }
        crate::metrics::record_batch_size(TIER, count);
        all
    }

    /// Remove `key`. Returns `false` if it was not present.
    pub fn del(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.deletes.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_operation(TIER, "del", "success");
            crate::metrics::set_memory_keys(self.entries.len());
            self.emit(CacheEventKind::Delete, key, "del");
        } else {
            crate::metrics::record_operation(TIER, "del", "miss");
        }
        removed
    }

    /// Re-arm the TTL of a live entry without touching its value.
    ///
    /// `seconds == 0` deletes the entry, as Redis `EXPIRE` does.
    pub fn expire(&self, key: &str, seconds: u64) -> bool {
        if seconds == 0 {
            return self.del(key);
        }
        let now = Instant::now();
        let Some(mut slot) = self.entries.get_mut(key) else {
            return false;
        };
        if slot.is_expired(now) {
            return false;
        }
        let seconds = seconds.min(MAX_TTL_SECS);
        slot.deadline = now.checked_add(Duration::from_secs(seconds));
        slot.entry.ttl_seconds = Some(seconds);
        slot.entry.expires_at = Some(expiry_after(now_millis(), seconds));
        true
    }

    /// Drop every entry. Returns how many were removed.
    pub fn flush(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.order.lock().clear();
        crate::metrics::set_memory_keys(0);
        debug!(count, "Memory cache flushed");
        count
    }

    /// One expiry sweep. Returns how many entries expired.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|slot| slot.is_expired(now))
            .map(|slot| slot.key().clone())
            .collect();

        let mut count = 0;
        for key in expired {
            if self.expire_now(&key, now) {
                count += 1;
            }
        }
        if count > 0 {
            crate::metrics::set_memory_keys(self.entries.len());
        }
        count
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Introspection
    // ═══════════════════════════════════════════════════════════════════════

    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        MemoryStats {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            keys: self.entries.len(),
            max_keys: self.max_keys,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    #[must_use]
    pub fn listeners(&self) -> &EventListeners {
        &self.listeners
    }

    pub fn add_event_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.listeners.add_listener(listener)
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove_listener(id)
    }

    /// Run [`purge_expired`](Self::purge_expired) every `period`.
    ///
    /// The task holds only a weak reference and ends once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    debug!("Memory cache dropped, sweeper exiting");
                    break;
                };
                let expired = cache.purge_expired();
                if expired > 0 {
                    debug!(expired, remaining = cache.len(), "Memory cache sweep");
                }
            }
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════════

    fn record_miss(&self, key: &str) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_operation(TIER, "get", "miss");
        self.emit(CacheEventKind::Miss, key, "get");
    }

    /// Remove `key` if it is still expired at `now`. Emits `Expire`.
    fn expire_now(&self, key: &str, now: Instant) -> bool {
        let removed = self
            .entries
            .remove_if(key, |_, slot| slot.is_expired(now))
            .is_some();
        if removed {
            self.expirations.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_expiration(TIER, 1);
            self.emit(CacheEventKind::Expire, key, "expire");
        }
        removed
    }

    /// Evict oldest entries until a new key fits. Returns evicted keys.
    fn make_room(&self, key: &str) -> Vec<String> {
        let mut evicted = Vec::new();
        if self.entries.len() < self.max_keys || self.entries.contains_key(key) {
            return evicted;
        }
        let mut order = self.order.lock();
        while self.entries.len() >= self.max_keys {
            let Some((old_key, seq)) = order.pop_front() else {
                break;
            };
            if self
                .entries
                .remove_if(&old_key, |_, slot| slot.seq == seq)
                .is_some()
            {
                evicted.push(old_key);
            }
        }
        evicted
    }

    fn track_insert(&self, key: String, seq: u64) {
        let mut order = self.order.lock();
        order.push_back((key, seq));

        // Overwrites leave stale records behind; compact once they dominate
        if order.len() > (self.max_keys.saturating_mul(2)).max(64) {
            order.retain(|(k, s)| self.entries.get(k).is_some_and(|slot| slot.seq == *s));
        }
    }

    fn emit(&self, kind: CacheEventKind, key: &str, operation: &str) {
        if self.listeners.is_empty() {
            return;
        }
        self.listeners.emit(
            &CacheEvent::new(kind)
                .with_key(key)
                .with_source(EventSource::Memory)
                .with_operation(operation),
        );
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::from_config(&MemoryConfig::default())
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("keys", &self.entries.len())
            .field("max_keys", &self.max_keys)
            .field("default_ttl_secs", &self.default_ttl_secs)
            .finish()
    }
}
