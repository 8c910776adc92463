// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Two-tier cache service.
//!
//! The [`CacheService`] ties the tiers together:
//! - Memory tier ([`MemoryCache`]): bounded, process-local, synchronous
//! - Redis tier ([`RemoteClient`]): shared, async, readiness-gated
//!
//! # Read path
//!
//! ```text
//! get(k) ──► memory ──hit──► value (source: memory | fallback)
//!              │
//!             miss
//!              ▼
//!            redis ──hit──► backfill memory (remaining TTL) ──► value (source: redis)
//!              │
//!             miss ──► CacheResult::miss()
//! ```
//!
//! # Write path
//!
//! Writes go to every enabled tier independently; a failure in one never
//! blocks the other. The Redis payload is the JSON entry envelope,
//! zstd-compressed when the resolved options ask for it.
//!
//! # Example
//!
//! ```rust,no_run
//! use tiered_cache::{CacheConfig, CacheOptions, CacheService, CacheStrategy};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = CacheService::open(CacheConfig::load()?).await?;
//!
//! let options = CacheOptions::strategy(CacheStrategy::DatabaseQuery);
//! let count: u64 = cache
//!     .get_or_set("stats:users:count", || async { Ok::<_, String>(42u64) }, &options)
//!     .await?;
//! assert_eq!(count, 42);
//!
//! cache.close().await;
//! # Ok(())
//! # }
//! ```

mod api;
mod lifecycle;
pub mod singleflight;
mod types;

pub use types::{CacheHealth, CacheMetrics, CacheStats, HealthStatus, ListenerHandle};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::RemoteClient;
use crate::compression::PayloadCompressor;
use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::{CacheError, CodecError};
use crate::events::CacheEvent;
use crate::memory::MemoryCache;
use crate::monitoring::LoggingListener;
use crate::storage::traits::RemoteStore;

use singleflight::Singleflight;

#[derive(Default)]
pub(crate) struct Counters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub memory_hits: AtomicU64,
    pub redis_hits: AtomicU64,
    pub fallback_hits: AtomicU64,
    pub sets: AtomicU64,
    pub deletes: AtomicU64,
    pub producer_calls: AtomicU64,
    pub coalesced: AtomicU64,
    pub invalidated: AtomicU64,
}

pub(crate) struct Inner {
    pub config: CacheConfig,
    pub memory: Arc<MemoryCache>,
    /// `None` when the Redis tier is disabled
    pub remote: Option<RemoteClient>,
    pub compressor: PayloadCompressor,
    pub flights: Singleflight,
    pub sweeper: Mutex<Option<JoinHandle<()>>>,
    pub closed: AtomicBool,
    pub counters: Counters,
}

/// Two-tier read-through/write-through cache.
///
/// Cheap to clone: clones share both tiers, counters and in-flight calls.
/// Pass it to request handlers through your application state instead of
/// keeping a global.
#[derive(Clone)]
pub struct CacheService {
    pub(crate) inner: Arc<Inner>,
}

impl CacheService {
    /// Build a service from validated configuration and an optional remote
    /// backend.
    ///
    /// No network I/O happens here. The remote tier is used only when
    /// `config.redis.enabled` is set and a backend is supplied; connect it
    /// with [`CacheService::connect`] or let `lazy_connect` do it on first
    /// use. Inside a tokio runtime the memory sweeper starts immediately.
    pub fn new(config: CacheConfig, remote: Option<Arc<dyn RemoteStore>>) -> Result<Self, CacheError> {
        let config = config.validated()?;
        crate::metrics::set_enabled(config.monitoring.metrics_enabled);

        let memory = Arc::new(MemoryCache::from_config(&config.memory));
        let remote = match remote {
            Some(store) if config.redis.enabled => Some(RemoteClient::from_config(store, &config.redis)),
            Some(_) => {
                debug!("Redis tier disabled by configuration, ignoring remote backend");
                None
            }
            None => None,
        };

        let logger = LoggingListener::new(config.monitoring);
        if logger.is_active() {
            let listener = logger.into_listener();
            memory.listeners().add_shared(listener.clone());
            if let Some(remote) = &remote {
                remote.listeners().add_shared(listener);
            }
        }

        let sweeper = match tokio::runtime::Handle::try_current() {
            Ok(_) => Some(memory.spawn_sweeper(std::time::Duration::from_secs(config.memory.check_period_secs))),
            Err(_) => {
                warn!("No tokio runtime; memory tier expiry is lazy until a sweeper runs");
                None
            }
        };

        let compressor = PayloadCompressor::new(config.compression.level, config.compression.min_size_bytes)
            .with_max_decompressed_bytes(config.compression.max_decompressed_bytes);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                memory,
                remote,
                compressor,
                flights: Singleflight::new(),
                sweeper: Mutex::new(sweeper),
                closed: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        })
    }

    /// Configuration the service was built with.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// The memory tier.
    #[must_use]
    pub fn memory(&self) -> &Arc<MemoryCache> {
        &self.inner.memory
    }

    /// The Redis tier, if enabled.
    #[must_use]
    pub fn remote(&self) -> Option<&RemoteClient> {
        self.inner.remote.as_ref()
    }

    /// Register `listener` on both tiers.
    pub fn add_event_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        let listener: crate::events::Listener = Arc::new(listener);
        let memory = self.inner.memory.listeners().add_shared(listener.clone());
        let remote = self.inner.remote.as_ref().map(|r| r.listeners().add_shared(listener));
        ListenerHandle { memory, remote }
    }

    /// Remove a listener from both tiers. Returns `true` if it was registered.
    pub fn remove_event_listener(&self, handle: ListenerHandle) -> bool {
        let mut removed = self.inner.memory.remove_event_listener(handle.memory);
        if let (Some(remote), Some(id)) = (&self.inner.remote, handle.remote) {
            removed |= remote.remove_event_listener(id);
        }
        removed
    }

    /// Whether the Redis tier is enabled and serving.
    #[must_use]
    pub fn remote_ready(&self) -> bool {
        self.inner.remote.as_ref().is_some_and(RemoteClient::is_ready)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Redis payload codec
    // ═══════════════════════════════════════════════════════════════════════

    /// JSON envelope, compressed when asked and large enough.
    pub(crate) fn encode_entry(&self, entry: &CacheEntry<Value>, compress: bool) -> Result<Vec<u8>, CodecError> {
        let json = serde_json::to_vec(entry)?;
        if !compress {
            return Ok(json);
        }
        let (bytes, stats) = self.inner.compressor.compress(json)?;
        if let Some(stats) = stats {
            crate::metrics::record_compression(&stats);
        }
        Ok(bytes)
    }

    /// Inverse of [`encode_entry`](Self::encode_entry); plain and compressed
    /// payloads are told apart by their magic bytes.
    pub(crate) fn decode_entry(&self, bytes: &[u8]) -> Result<CacheEntry<Value>, CodecError> {
        let plain = self.inner.compressor.decompress(bytes)?;
        Ok(serde_json::from_slice(&plain)?)
    }
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("environment", &self.inner.config.environment)
            .field("memory_keys", &self.inner.memory.len())
            .field("remote", &self.inner.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::Environment;
    use crate::storage::memory::InMemoryStore;

    /// Test preset with the Redis tier backed by an in-process store.
    pub fn config_with_remote() -> CacheConfig {
        let mut config = CacheConfig::for_environment(Environment::Test);
        config.redis.enabled = true;
        config.redis.lazy_connect = true;
        config.redis.max_reconnect_attempts = 3;
        config
    }

    pub fn service_with_store() -> (CacheService, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let service = CacheService::new(config_with_remote(), Some(store.clone() as Arc<dyn RemoteStore>))
            .expect("valid test config");
        (service, store)
    }

    pub fn memory_only() -> CacheService {
        CacheService::new(CacheConfig::for_environment(Environment::Test), None).expect("valid test config")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = CacheConfig::default();
        config.redis.port = 0;
        let err = CacheService::new(config, None).unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[tokio::test]
    async fn test_disabled_redis_ignores_backend() {
        let store: Arc<dyn RemoteStore> = Arc::new(crate::storage::memory::InMemoryStore::new());
        let service = CacheService::new(
            CacheConfig::for_environment(crate::config::Environment::Test),
            Some(store),
        )
        .unwrap();
        assert!(service.remote().is_none());
        assert!(!service.remote_ready());
    }

    #[tokio::test]
    async fn test_codec_roundtrip_plain_and_compressed() {
        let (service, _) = service_with_store();
        let big = "x".repeat(4096);
        let entry = CacheEntry::new("k", json!({ "blob": big }), Some(60));

        let plain = service.encode_entry(&entry, false).unwrap();
        assert_eq!(service.decode_entry(&plain).unwrap(), entry);

        let packed = service.encode_entry(&entry, true).unwrap();
        #[cfg(feature = "compression")]
        assert!(packed.len() < plain.len());
        assert_eq!(service.decode_entry(&packed).unwrap(), entry);
    }

    #[tokio::test]
    async fn test_listener_fans_out_to_both_tiers() {
        let (service, _) = service_with_store();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = service.add_event_listener(move |e: &CacheEvent| {
            sink.lock().push(e.source);
        });

        service.set("k", &1, &crate::CacheOptions::new()).await;
        {
            let seen = seen.lock();
            assert!(seen.contains(&Some(crate::events::EventSource::Memory)));
            assert!(seen.contains(&Some(crate::events::EventSource::Redis)));
        }

        assert!(service.remove_event_listener(handle));
        let before = seen.lock().len();
        service.set("k2", &2, &crate::CacheOptions::new()).await;
        assert_eq!(seen.lock().len(), before);
    }
}
