// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Service lifecycle: open, connect, close, and health/stat snapshots.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{info, warn};

use crate::client::RemoteState;
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::storage::redis::RedisStore;
use crate::storage::traits::RemoteStore;

use super::{CacheHealth, CacheMetrics, CacheService, CacheStats, HealthStatus};

impl CacheService {
    /// Build the service against Redis as configured.
    ///
    /// With `lazy_connect` off, the connection is attempted here. A failed
    /// attempt does not fail `open`: the client reconnects in the background
    /// and the service serves from memory meanwhile. Only an unusable Redis
    /// URL or invalid configuration is an error.
    #[tracing::instrument(skip(config), fields(environment = %config.environment.as_str()))]
    pub async fn open(config: CacheConfig) -> Result<Self, CacheError> {
        let remote: Option<Arc<dyn RemoteStore>> = if config.redis.enabled {
            let prefix = Some(config.redis.key_prefix.as_str()).filter(|p| !p.is_empty());
            let store = RedisStore::new(&config.redis.connection_url(), prefix)?;
            Some(Arc::new(store))
        } else {
            info!("Redis tier disabled, running memory-only");
            None
        };

        let lazy = config.redis.lazy_connect;
        let service = Self::new(config, remote)?;
        if !lazy {
            service.connect().await;
        }
        info!(
            max_keys = service.inner.memory.max_keys(),
            redis = service.inner.remote.is_some(),
            "Cache service opened"
        );
        Ok(service)
    }

    /// Connect the Redis tier now. Returns whether it is ready.
    ///
    /// Memory-only services report `false`.
    pub async fn connect(&self) -> bool {
        let Some(remote) = &self.inner.remote else {
            return false;
        };
        match remote.connect().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Redis tier unavailable at startup, serving from memory");
                false
            }
        }
    }

    /// Stop the sweeper and release the Redis connection.
    ///
    /// Safe to call more than once and during shutdown; the Redis disconnect
    /// is bounded by `connect_timeout`.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(sweeper) = self.inner.sweeper.lock().take() {
            sweeper.abort();
        }
        if let Some(remote) = &self.inner.remote {
            remote.close().await;
        }
        info!("Cache service closed");
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Introspection
    // ═══════════════════════════════════════════════════════════════════════

    /// Health for readiness endpoints.
    ///
    /// A Redis tier that is enabled but not serving, including one that gave
    /// up reconnecting, makes the service `Degraded`: requests still succeed
    /// from memory, but the host should alert.
    #[must_use]
    pub fn health(&self) -> CacheHealth {
        let remote_state = self.inner.remote.as_ref().map(|r| r.state());
        let status = if self.is_closed() {
            HealthStatus::Unhealthy
        } else {
            match remote_state {
                None | Some(RemoteState::Ready) => HealthStatus::Healthy,
                // Lazy client that has not been needed yet
                Some(RemoteState::Idle) => HealthStatus::Healthy,
                Some(RemoteState::Closed) => HealthStatus::Unhealthy,
                Some(_) => HealthStatus::Degraded,
            }
        };

        if let Some(remote) = &self.inner.remote {
            crate::metrics::set_backend_healthy(remote.backend(), remote.is_ready());
        }

        CacheHealth {
            status,
            remote_state,
            memory_keys: self.inner.memory.len(),
            memory_max_keys: self.inner.memory.max_keys(),
        }
    }

    /// Per-tier counters and the overall hit rate.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let hits = self.inner.counters.hits.load(Ordering::Relaxed);
        let misses = self.inner.counters.misses.load(Ordering::Relaxed);
        CacheStats {
            memory: self.inner.memory.stats(),
            remote: self.inner.remote.as_ref().map(|r| r.stats()),
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
        }
    }

    /// Service-level counters.
    #[must_use]
    pub fn metrics(&self) -> CacheMetrics {
        let c = &self.inner.counters;
        let hits = c.hits.load(Ordering::Relaxed);
        let misses = c.misses.load(Ordering::Relaxed);
        CacheMetrics {
            requests: hits + misses,
            hits,
            misses,
            memory_hits: c.memory_hits.load(Ordering::Relaxed),
            redis_hits: c.redis_hits.load(Ordering::Relaxed),
            fallback_hits: c.fallback_hits.load(Ordering::Relaxed),
            sets: c.sets.load(Ordering::Relaxed),
            deletes: c.deletes.load(Ordering::Relaxed),
            producer_calls: c.producer_calls.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            invalidated: c.invalidated.load(Ordering::Relaxed),
            hit_rate: hit_rate(hits, misses),
        }
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
