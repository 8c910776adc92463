// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the cache service.

use serde::Serialize;

use crate::client::{RemoteState, RemoteStats};
use crate::events::ListenerId;
use crate::memory::MemoryStats;

/// Overall service health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every enabled tier is serving
    Healthy,
    /// Redis is enabled but not serving; reads and writes fall back to memory
    Degraded,
    /// The service has been closed
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health snapshot for readiness/liveness endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheHealth {
    pub status: HealthStatus,
    /// `None` when the Redis tier is disabled
    pub remote_state: Option<RemoteState>,
    pub memory_keys: usize,
    pub memory_max_keys: usize,
}

impl CacheHealth {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Per-tier counters plus the overall hit rate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub memory: MemoryStats,
    /// `None` when the Redis tier is disabled
    pub remote: Option<RemoteStats>,
    /// Service-level reads answered by any tier
    pub hits: u64,
    /// Service-level reads answered by no tier
    pub misses: u64,
    pub hit_rate: f64,
}

/// Service-level counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub memory_hits: u64,
    pub redis_hits: u64,
    /// Memory hits served while Redis was unavailable
    pub fallback_hits: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Producer invocations by `get_or_set` and `warm`
    pub producer_calls: u64,
    /// `get_or_set` callers that waited on another caller's producer
    pub coalesced: u64,
    /// Keys removed by pattern invalidation
    pub invalidated: u64,
    pub hit_rate: f64,
}

/// Registration of one listener on both tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle {
    pub(super) memory: ListenerId,
    pub(super) remote: Option<ListenerId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_display() {
        assert_eq!(format!("{}", HealthStatus::Healthy), "healthy");
        assert_eq!(format!("{}", HealthStatus::Degraded), "degraded");
        assert_eq!(format!("{}", HealthStatus::Unhealthy), "unhealthy");
    }

    #[test]
    fn test_health_serializes_lowercase() {
        let health = CacheHealth {
            status: HealthStatus::Degraded,
            remote_state: Some(RemoteState::Failed),
            memory_keys: 3,
            memory_max_keys: 100,
        };
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["remote_state"], "failed");
        assert!(!health.is_healthy());
    }
}
