// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache event instrumentation.
//!
//! Both tiers publish [`CacheEvent`]s to zero or more listeners. Events are
//! for observability only; nothing in the cache reacts to them.
//!
//! Listeners run synchronously on the emitting thread. Each call is wrapped
//! in its own panic boundary so a faulty observer can neither fail the cache
//! operation nor starve the listeners registered after it.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use tiered_cache::events::{CacheEvent, CacheEventKind, EventListeners};
//!
//! let listeners = EventListeners::new();
//! let hits = Arc::new(AtomicUsize::new(0));
//! let counter = hits.clone();
//!
//! let id = listeners.add_listener(move |event: &CacheEvent| {
//!     if event.kind == CacheEventKind::Hit {
//!         counter.fetch_add(1, Ordering::Relaxed);
//!     }
//! });
//!
//! listeners.emit(&CacheEvent::new(CacheEventKind::Hit).with_key("a"));
//! assert_eq!(hits.load(Ordering::Relaxed), 1);
//!
//! assert!(listeners.remove_listener(id));
//! ```

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;

use crate::entry::now_millis;

/// Kind of cache event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheEventKind {
    Hit,
    Miss,
    Set,
    Delete,
    /// TTL elapsed (distinct from a miss)
    Expire,
    /// Removed to make room (capacity bound)
    Evict,
    Error,
    Connect,
    Disconnect,
}

impl CacheEventKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Set => "set",
            Self::Delete => "delete",
            Self::Expire => "expire",
            Self::Evict => "evict",
            Self::Error => "error",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
        }
    }
}

impl std::fmt::Display for CacheEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tier that emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Memory,
    Redis,
}

impl EventSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
        }
    }
}

/// A single observable cache occurrence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEvent {
    pub kind: CacheEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<EventSource>,
    /// Epoch millis
    pub timestamp: i64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CacheEvent {
    #[must_use]
    pub fn new(kind: CacheEventKind) -> Self {
        Self {
            kind,
            key: None,
            source: None,
            timestamp: now_millis(),
            metadata: BTreeMap::new(),
            error: None,
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: EventSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Tag the event with the operation that produced it.
    #[must_use]
    pub fn with_operation(self, operation: &str) -> Self {
        self.with_meta("operation", operation)
    }

    #[must_use]
    pub fn with_meta(mut self, name: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(name.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl std::fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// The `operation` metadata entry, if present.
    #[must_use]
    pub fn operation(&self) -> Option<&str> {
        self.metadata.get("operation").map(String::as_str)
    }
}

/// Handle returned by [`EventListeners::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Shared listener callback.
pub type Listener = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

/// Registry of event listeners.
///
/// Cloning shares the registry, so a listener added through one handle is
/// seen by every clone.
#[derive(Clone, Default)]
pub struct EventListeners {
    inner: Arc<ListenerRegistry>,
}

#[derive(Default)]
struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
}

impl EventListeners {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.add_shared(Arc::new(listener))
    }

    /// Register an already shared listener (the same callback can be attached
    /// to several registries).
    pub fn add_shared(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.write().push((id, listener));
        id
    }

    /// Unregister a listener. Returns `false` if the id is unknown.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.listeners.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every listener.
    pub fn emit(&self, event: &CacheEvent) {
        // Snapshot so listeners may (un)register without deadlocking.
        let snapshot: Vec<Listener> = {
            let listeners = self.inner.listeners.read();
            if listeners.is_empty() {
                return;
            }
            listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(event = %event.kind, key = ?event.key, "Cache event listener panicked");
                crate::metrics::record_listener_failure(event.kind.as_str());
            }
        }
    }
}

impl std::fmt::Debug for EventListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListeners")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_emit_reaches_all_listeners() {
        let listeners = EventListeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for name in ["a", "b"] {
            let seen = seen.clone();
            listeners.add_listener(move |e: &CacheEvent| {
                seen.lock().push(format!("{}:{}", name, e.kind));
            });
        }

        listeners.emit(&CacheEvent::new(CacheEventKind::Set).with_key("k"));
        assert_eq!(*seen.lock(), vec!["a:set".to_string(), "b:set".to_string()]);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let listeners = EventListeners::new();
        let reached = Arc::new(AtomicU64::new(0));

        listeners.add_listener(|_e: &CacheEvent| panic!("observer bug"));
        let counter = reached.clone();
        listeners.add_listener(move |_e: &CacheEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        listeners.emit(&CacheEvent::new(CacheEventKind::Miss));
        listeners.emit(&CacheEvent::new(CacheEventKind::Miss));

        assert_eq!(reached.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_remove_listener() {
        let listeners = EventListeners::new();
        let id = listeners.add_listener(|_e: &CacheEvent| {});
        assert_eq!(listeners.len(), 1);

        assert!(listeners.remove_listener(id));
        assert!(!listeners.remove_listener(id));
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_clones_share_registry() {
        let a = EventListeners::new();
        let b = a.clone();
        a.add_listener(|_e: &CacheEvent| {});
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_event_builders() {
        let event = CacheEvent::new(CacheEventKind::Error)
            .with_key("user:1")
            .with_source(EventSource::Redis)
            .with_operation("get")
            .with_error("connection reset");

        assert_eq!(event.operation(), Some("get"));
        assert_eq!(event.error.as_deref(), Some("connection reset"));
        assert!(event.timestamp > 0);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "error");
        assert_eq!(json["source"], "redis");
        assert_eq!(json["metadata"]["operation"], "get");
    }
}
