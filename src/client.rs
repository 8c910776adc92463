// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote tier client.
//!
//! Wraps a raw [`RemoteStore`] with the behaviour the cache relies on:
//! readiness gating, per-command timeouts, event emission and bounded
//! reconnection.
//!
//! # State machine
//!
//! ```text
//!            connect()                     connection error
//!   Idle ──────────────► Connecting ──► Ready ─────────────► Reconnecting
//!    ▲  (lazy: first op)      │           ▲                      │   │
//!    │                        │ fail      └──────── success ─────┘   │ attempts
//!    │                        └──────────────► Reconnecting          │ exhausted
//!    │                                                               ▼
//!    │                          reconnect() ◄─────────────────── Failed
//!    │
//!   close() from any state ──► Closed
//! ```
//!
//! While not `Ready`, every operation is a no-op that reports a miss,
//! `false` or an empty result without touching the network. Commands are
//! bounded by `command_timeout`; a timeout counts as a connection error.
//!
//! Reconnection runs on a single background task with exponential backoff
//! (`base_delay` doubling up to `max_delay`) and gives up after
//! `max_reconnect_attempts`. A `Failed` client stays failed until
//! [`RemoteClient::reconnect`] is called.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::RedisConfig;
use crate::events::{CacheEvent, CacheEventKind, EventListeners, EventSource, ListenerId};
use crate::metrics::{self, LatencyTimer};
use crate::resilience::retry::{retry, RetryConfig};
use crate::storage::traits::{KeyTtl, RemoteStore, StorageError};

const TIER: &str = "redis";

/// Connection lifecycle of the remote tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteState {
    /// Created, no connection attempted yet
    Idle,
    /// First connection attempt in flight
    Connecting,
    /// Serving commands
    Ready,
    /// Connection lost, background reconnect in progress
    Reconnecting,
    /// Reconnect attempts exhausted; needs [`RemoteClient::reconnect`]
    Failed,
    /// Shut down by [`RemoteClient::close`]
    Closed,
}

impl RemoteState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for RemoteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote tier counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RemoteStats {
    pub state: RemoteState,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    pub timeouts: u64,
    /// Successful reconnects (initial connect excluded)
    pub reconnects: u64,
    /// hits / (hits + misses), 0.0 before any read
    pub hit_rate: f64,
}

/// Client tunables, usually derived from [`RedisConfig`].
#[derive(Debug, Clone)]
pub struct RemoteClientOptions {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub reconnect: RetryConfig,
    pub lazy_connect: bool,
    pub eviction_policy: String,
    pub keyspace_events: String,
}

impl From<&RedisConfig> for RemoteClientOptions {
    fn from(config: &RedisConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            command_timeout: config.command_timeout(),
            reconnect: config.reconnect_policy(),
            lazy_connect: config.lazy_connect,
            eviction_policy: config.eviction_policy.clone(),
            keyspace_events: config.keyspace_events.clone(),
        }
    }
}

struct Inner {
    store: Arc<dyn RemoteStore>,
    options: RemoteClientOptions,
    state: watch::Sender<RemoteState>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    listeners: EventListeners,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
    reconnects: AtomicU64,
}

/// Readiness-gated, self-healing handle to the remote tier.
///
/// Cheap to clone; clones share the connection, state and listeners.
#[derive(Clone)]
pub struct RemoteClient {
    inner: Arc<Inner>,
}

impl RemoteClient {
    /// Wrap `store`. No I/O happens until [`connect`](Self::connect) or, with
    /// `lazy_connect`, the first operation.
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>, options: RemoteClientOptions) -> Self {
        let (state, _) = watch::channel(RemoteState::Idle);
        Self {
            inner: Arc::new(Inner {
                store,
                options,
                state,
                reconnect_task: Mutex::new(None),
                listeners: EventListeners::new(),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                sets: AtomicU64::new(0),
                deletes: AtomicU64::new(0),
                errors: AtomicU64::new(0),
                timeouts: AtomicU64::new(0),
                reconnects: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn from_config(store: Arc<dyn RemoteStore>, config: &RedisConfig) -> Self {
        Self::new(store, RemoteClientOptions::from(config))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RemoteState {
        *self.inner.state.borrow()
    }

    /// Watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<RemoteState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == RemoteState::Ready
    }

    /// Backend label (`redis`, `memory`, …).
    #[must_use]
    pub fn backend(&self) -> &'static str {
        self.inner.store.name()
    }

    /// Open the connection.
    ///
    /// Only acts from `Idle`; in any other state it reports whether the
    /// client is ready. A failed first attempt hands over to the background
    /// reconnect loop and returns the error.
    pub async fn connect(&self) -> Result<(), StorageError> {
        if !self.transition(&[RemoteState::Idle], RemoteState::Connecting) {
            return if self.is_ready() { Ok(()) } else { Err(StorageError::NotReady) };
        }

        let backend = self.backend();
        match self.bounded_connect().await {
            Ok(()) => {
                info!(backend, "Remote tier connected");
                self.on_connected(&[RemoteState::Connecting]).await;
                Ok(())
            }
            Err(e) => {
                warn!(backend, error = %e, "Remote tier connect failed, scheduling reconnect");
                metrics::record_connection_error(backend);
                metrics::set_backend_healthy(backend, false);
                self.inner.errors.fetch_add(1, Ordering::Relaxed);
                self.emit(
                    CacheEvent::new(CacheEventKind::Error)
                        .with_operation("connect")
                        .with_error(&e),
                );
                if self.transition(&[RemoteState::Connecting], RemoteState::Reconnecting) {
                    self.spawn_reconnect();
                }
                Err(e)
            }
        }
    }

    /// Restart the reconnect cycle after the client gave up.
    ///
    /// Returns `true` if a new cycle was started.
    pub fn reconnect(&self) -> bool {
        if self.transition(&[RemoteState::Failed, RemoteState::Idle], RemoteState::Reconnecting) {
            info!(backend = self.backend(), "Manual reconnect requested");
            self.spawn_reconnect();
            true
        } else {
            false
        }
    }

    /// Stop background work and release the connection.
    ///
    /// Idempotent. The disconnect is bounded by `connect_timeout`.
    pub async fn close(&self) {
        let previous = self.inner.state.send_replace(RemoteState::Closed);
        if previous == RemoteState::Closed {
            return;
        }
        metrics::set_remote_state(RemoteState::Closed.as_str());

        if let Some(task) = self.inner.reconnect_task.lock().take() {
            task.abort();
        }

        let backend = self.backend();
        match timeout(self.inner.options.connect_timeout, self.inner.store.disconnect()).await {
            Ok(Ok(())) => debug!(backend, "Remote tier disconnected"),
            Ok(Err(e)) => warn!(backend, error = %e, "Remote tier disconnect failed"),
            Err(_) => warn!(backend, "Remote tier disconnect timed out"),
        }

        if previous == RemoteState::Ready {
            self.emit(CacheEvent::new(CacheEventKind::Disconnect).with_operation("close"));
        }
        metrics::set_backend_healthy(backend, false);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Commands
    // ═══════════════════════════════════════════════════════════════════════

    /// Raw bytes for `key`, `None` on miss or when unavailable.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let value = self.run("get", Some(key), |store| async move { store.get(key).await }).await?;
        self.record_read(key, "get", value.as_deref());
        value
    }

    /// Write raw bytes. `ttl` of `None` stores without expiry.
    pub async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> bool {
        let written = self
            .run("set", Some(key), |store| async move { store.set(key, value, ttl).await })
            .await
            .is_some();
        if written {
            self.inner.sets.fetch_add(1, Ordering::Relaxed);
            metrics::record_bytes_written(TIER, value.len());
            self.emit(self.event(CacheEventKind::Set, "set", key));
        }
        written
    }

    /// Returns whether the key existed.
    pub async fn del(&self, key: &str) -> bool {
        let removed = self
            .run("del", Some(key), |store| async move { store.del(key).await })
            .await
            .unwrap_or(false);
        if removed {
            self.inner.deletes.fetch_add(1, Ordering::Relaxed);
            self.emit(self.event(CacheEventKind::Delete, "del", key));
        }
        removed
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.run("exists", Some(key), |store| async move { store.exists(key).await })
            .await
            .unwrap_or(false)
    }

    /// Remaining lifetime, `None` when unavailable.
    pub async fn ttl(&self, key: &str) -> Option<KeyTtl> {
        self.run("ttl", Some(key), |store| async move { store.ttl(key).await }).await
    }

    /// Re-arm a key's TTL without touching its value.
    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        self.run("expire", Some(key), |store| async move { store.expire(key, ttl).await })
            .await
            .unwrap_or(false)
    }

    /// Batch read; all `None` when unavailable.
    pub async fn mget(&self, keys: &[String]) -> Vec<Option<Vec<u8>>> {
        if keys.is_empty() {
            return Vec::new();
        }
        metrics::record_batch_size(TIER, keys.len());
        match self.run("mget", None, |store| async move { store.mget(keys).await }).await {
            Some(values) => {
                for (key, value) in keys.iter().zip(&values) {
                    self.record_read(key, "mget", value.as_deref());
                }
                values
            }
            None => vec![None; keys.len()],
        }
    }

    /// Batch write with a shared TTL (not atomic across keys).
    pub async fn mset(&self, items: &[(String, Vec<u8>)], ttl: Option<Duration>) -> bool {
        if items.is_empty() {
            return true;
        }
        metrics::record_batch_size(TIER, items.len());
        let written = self
            .run("mset", None, |store| async move { store.mset(items, ttl).await })
            .await
            .is_some();
        if written {
            self.inner.sets.fetch_add(items.len() as u64, Ordering::Relaxed);
            for (key, value) in items {
                metrics::record_bytes_written(TIER, value.len());
                self.emit(self.event(CacheEventKind::Set, "mset", key));
            }
        }
        written
    }

    /// Keys matching a glob; empty when unavailable.
    pub async fn keys(&self, pattern: &str) -> Vec<String> {
        self.run("keys", None, |store| async move { store.keys(pattern).await })
            .await
            .unwrap_or_default()
    }

    /// Delete many keys, returning how many existed.
    pub async fn del_many(&self, keys: &[String]) -> usize {
        if keys.is_empty() {
            return 0;
        }
        let removed = self
            .run("del_many", None, |store| async move { store.del_many(keys).await })
            .await
            .unwrap_or(0);
        if removed > 0 {
            self.inner.deletes.fetch_add(removed as u64, Ordering::Relaxed);
            for key in keys {
                self.emit(self.event(CacheEventKind::Delete, "del_many", key));
            }
        }
        removed
    }

    /// Remove every key owned by this client's store.
    pub async fn flushdb(&self) -> bool {
        self.run("flushdb", None, |store| async move { store.flushdb().await })
            .await
            .is_some()
    }

    pub async fn ping(&self) -> bool {
        self.run("ping", None, |store| async move { store.ping().await })
            .await
            .is_some()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Events & stats
    // ═══════════════════════════════════════════════════════════════════════

    pub fn add_event_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add_listener(listener)
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove_listener(id)
    }

    /// Listener registry shared by every clone.
    #[must_use]
    pub fn listeners(&self) -> &EventListeners {
        &self.inner.listeners
    }

    #[must_use]
    pub fn stats(&self) -> RemoteStats {
        let hits = self.inner.hits.load(Ordering::Relaxed);
        let misses = self.inner.misses.load(Ordering::Relaxed);
        let reads = hits + misses;
        RemoteStats {
            state: self.state(),
            hits,
            misses,
            sets: self.inner.sets.load(Ordering::Relaxed),
            deletes: self.inner.deletes.load(Ordering::Relaxed),
            errors: self.inner.errors.load(Ordering::Relaxed),
            timeouts: self.inner.timeouts.load(Ordering::Relaxed),
            reconnects: self.inner.reconnects.load(Ordering::Relaxed),
            hit_rate: if reads == 0 { 0.0 } else { hits as f64 / reads as f64 },
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════════

    /// Gate, time-bound and instrument one store call.
    ///
    /// `None` means the command did not run or failed; the failure has
    /// already been reported.
    async fn run<T, F, Fut>(&self, operation: &'static str, key: Option<&str>, command: F) -> Option<T>
    where
        F: FnOnce(Arc<dyn RemoteStore>) -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        if !self.ensure_ready().await {
            metrics::record_operation(TIER, operation, "not_ready");
            return None;
        }

        let _timer = LatencyTimer::new(TIER, operation);
        let outcome = timeout(self.inner.options.command_timeout, command(self.inner.store.clone())).await;
        match outcome {
            Ok(Ok(value)) => {
                metrics::record_operation(TIER, operation, "success");
                Some(value)
            }
            Ok(Err(e)) => {
                self.on_error(operation, key, e);
                None
            }
            Err(_) => {
                self.inner.timeouts.fetch_add(1, Ordering::Relaxed);
                metrics::record_timeout(TIER, operation);
                self.on_error(operation, key, StorageError::Timeout(operation.to_string()));
                None
            }
        }
    }

    /// `Ready`, or connect on demand from `Idle` when lazy.
    async fn ensure_ready(&self) -> bool {
        match self.state() {
            RemoteState::Ready => true,
            RemoteState::Idle if self.inner.options.lazy_connect => self.connect().await.is_ok(),
            _ => false,
        }
    }

    async fn bounded_connect(&self) -> Result<(), StorageError> {
        match timeout(self.inner.options.connect_timeout, self.inner.store.connect()).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout("connect".to_string())),
        }
    }

    /// Apply server settings and announce readiness.
    async fn on_connected(&self, from: &[RemoteState]) {
        let options = &self.inner.options;
        let backend = self.backend();

        // Managed Redis offerings often reject CONFIG; readiness does not depend on it
        match timeout(
            options.command_timeout,
            self.inner.store.configure(&options.eviction_policy, &options.keyspace_events),
        )
        .await
        {
            Ok(Ok(())) => debug!(backend, "Remote tier configured"),
            Ok(Err(e)) => warn!(backend, error = %e, "Remote tier configuration rejected"),
            Err(_) => warn!(backend, "Remote tier configuration timed out"),
        }

        if self.transition(from, RemoteState::Ready) {
            metrics::set_backend_healthy(backend, true);
            self.emit(CacheEvent::new(CacheEventKind::Connect).with_operation("connect"));
        }
    }

    fn on_error(&self, operation: &'static str, key: Option<&str>, err: StorageError) {
        let backend = self.backend();
        self.inner.errors.fetch_add(1, Ordering::Relaxed);
        metrics::record_operation(TIER, operation, "error");
        metrics::record_error(TIER, operation, err.kind());
        warn!(backend, operation, key = key.unwrap_or("-"), error = %err, "Remote tier operation failed");

        let mut event = CacheEvent::new(CacheEventKind::Error).with_operation(operation).with_error(&err);
        if let Some(key) = key {
            event = event.with_key(key);
        }
        self.emit(event);

        if err.is_connection_error() && self.transition(&[RemoteState::Ready], RemoteState::Reconnecting) {
            metrics::record_connection_error(backend);
            metrics::set_backend_healthy(backend, false);
            self.emit(
                CacheEvent::new(CacheEventKind::Disconnect)
                    .with_operation(operation)
                    .with_error(&err),
            );
            self.spawn_reconnect();
        }
    }

    /// One background reconnect loop; callers must have won the transition
    /// into `Reconnecting`.
    fn spawn_reconnect(&self) {
        let client = self.clone();
        let handle = tokio::spawn(async move {
            let backend = client.backend();
            let policy = client.inner.options.reconnect.clone();
            let result = retry("remote_reconnect", &policy, || client.bounded_connect()).await;

            match result {
                Ok(()) => {
                    client.inner.reconnects.fetch_add(1, Ordering::Relaxed);
                    metrics::record_reconnect("success");
                    info!(backend, "Remote tier reconnected");
                    client.on_connected(&[RemoteState::Reconnecting]).await;
                }
                Err(e) => {
                    if client.transition(&[RemoteState::Reconnecting], RemoteState::Failed) {
                        metrics::record_reconnect("exhausted");
                        metrics::set_backend_healthy(backend, false);
                        error!(
                            backend,
                            attempts = policy.max_attempts,
                            error = %e,
                            "Remote tier reconnect attempts exhausted; serving from memory only"
                        );
                    }
                }
            }
        });

        if let Some(previous) = self.inner.reconnect_task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Move to `to` if the current state is one of `from`.
    fn transition(&self, from: &[RemoteState], to: RemoteState) -> bool {
        let changed = self.inner.state.send_if_modified(|state| {
            if from.contains(state) {
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            metrics::set_remote_state(to.as_str());
            debug!(backend = self.backend(), state = %to, "Remote tier state changed");
        }
        changed
    }

    fn record_read(&self, key: &str, operation: &str, value: Option<&[u8]>) {
        match value {
            Some(bytes) => {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_bytes_read(TIER, bytes.len());
                self.emit(self.event(CacheEventKind::Hit, operation, key));
            }
            None => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                self.emit(self.event(CacheEventKind::Miss, operation, key));
            }
        }
    }

    fn event(&self, kind: CacheEventKind, operation: &str, key: &str) -> CacheEvent {
        CacheEvent::new(kind).with_key(key).with_operation(operation)
    }

    fn emit(&self, event: CacheEvent) {
        self.inner.listeners.emit(&event.with_source(EventSource::Redis));
    }
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("backend", &self.backend())
            .field("state", &self.state())
            .finish()
    }
}
