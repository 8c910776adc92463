// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for tiered-cache.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `tiered_cache_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for size histograms
//!
//! # Labels
//! - `tier`: memory, redis, all
//! - `operation`: get, set, del, mget, mset, keys, flush, ...
//! - `status`: hit, miss, success, error, skipped
//!
//! Emission is process-wide and can be switched off with [`set_enabled`]
//! (driven by `monitoring.metrics_enabled`).

use metrics::{counter, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::compression::CompressionStats;

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Enable or disable metric emission for the whole process.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

#[inline]
fn enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Record a cache operation outcome
pub fn record_operation(tier: &str, operation: &str, status: &str) {
    if !enabled() {
        return;
    }
    counter!(
        "tiered_cache_operations_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(tier: &str, operation: &str, duration: Duration) {
    if !enabled() {
        return;
    }
    histogram!(
        "tiered_cache_operation_seconds",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record batch size (mget/mset/del_many)
pub fn record_batch_size(tier: &str, count: usize) {
    if !enabled() {
        return;
    }
    histogram!(
        "tiered_cache_batch_size",
        "tier" => tier.to_string()
    )
    .record(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// MEMORY TIER - Size and churn
// ═══════════════════════════════════════════════════════════════════════════

/// Set current memory tier key count
pub fn set_memory_keys(count: usize) {
    if !enabled() {
        return;
    }
    gauge!("tiered_cache_memory_keys").set(count as f64);
}

/// Record capacity evictions
pub fn record_eviction(tier: &str, count: usize) {
    if !enabled() {
        return;
    }
    counter!(
        "tiered_cache_evictions_total",
        "tier" => tier.to_string()
    )
    .increment(count as u64);
}

/// Record TTL expirations
pub fn record_expiration(tier: &str, count: usize) {
    if !enabled() {
        return;
    }
    counter!(
        "tiered_cache_expirations_total",
        "tier" => tier.to_string()
    )
    .increment(count as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TRACKING - Categorized error counters for alerting
// ═══════════════════════════════════════════════════════════════════════════

/// Record an error with category for alerting
pub fn record_error(tier: &str, operation: &str, error_type: &str) {
    if !enabled() {
        return;
    }
    counter!(
        "tiered_cache_errors_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a connection/backend error
pub fn record_connection_error(backend: &str) {
    if !enabled() {
        return;
    }
    counter!(
        "tiered_cache_connection_errors_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Record a timeout error
pub fn record_timeout(tier: &str, operation: &str) {
    if !enabled() {
        return;
    }
    counter!(
        "tiered_cache_timeouts_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a panicking event listener
pub fn record_listener_failure(event: &str) {
    if !enabled() {
        return;
    }
    counter!(
        "tiered_cache_listener_failures_total",
        "event" => event.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// THROUGHPUT - Bytes moved to and from Redis
// ═══════════════════════════════════════════════════════════════════════════

/// Record bytes written to a tier
pub fn record_bytes_written(tier: &str, bytes: usize) {
    if !enabled() {
        return;
    }
    counter!(
        "tiered_cache_bytes_written_total",
        "tier" => tier.to_string()
    )
    .increment(bytes as u64);
}

/// Record bytes read from a tier
pub fn record_bytes_read(tier: &str, bytes: usize) {
    if !enabled() {
        return;
    }
    counter!(
        "tiered_cache_bytes_read_total",
        "tier" => tier.to_string()
    )
    .increment(bytes as u64);
}

/// Record a compressed write
pub fn record_compression(stats: &CompressionStats) {
    if !enabled() {
        return;
    }
    counter!("tiered_cache_compressed_writes_total").increment(1);
    histogram!("tiered_cache_compression_ratio").record(stats.ratio);
    counter!("tiered_cache_compression_saved_bytes_total")
        .increment(stats.original_bytes.saturating_sub(stats.compressed_bytes) as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// BACKEND HEALTH - Connection status
// ═══════════════════════════════════════════════════════════════════════════

/// Set backend health status (1 = healthy, 0 = unhealthy)
pub fn set_backend_healthy(backend: &str, healthy: bool) {
    if !enabled() {
        return;
    }
    gauge!(
        "tiered_cache_backend_healthy",
        "backend" => backend.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

/// Track remote client state transitions
pub fn set_remote_state(state: &str) {
    if !enabled() {
        return;
    }
    counter!(
        "tiered_cache_remote_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// Record a reconnect cycle outcome (success, exhausted, cancelled)
pub fn record_reconnect(outcome: &str) {
    if !enabled() {
        return;
    }
    counter!(
        "tiered_cache_reconnects_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// SERVICE - Orchestration level
// ═══════════════════════════════════════════════════════════════════════════

/// Record a get_or_set outcome (hit, leader, follower)
pub fn record_get_or_set(role: &str) {
    if !enabled() {
        return;
    }
    counter!(
        "tiered_cache_get_or_set_total",
        "role" => role.to_string()
    )
    .increment(1);
}

/// Record a pattern invalidation
pub fn record_invalidation(removed: usize) {
    if !enabled() {
        return;
    }
    counter!("tiered_cache_invalidations_total").increment(1);
    counter!("tiered_cache_invalidated_keys_total").increment(removed as u64);
}

/// Record a warm task outcome
pub fn record_warm(status: &str) {
    if !enabled() {
        return;
    }
    counter!(
        "tiered_cache_warm_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a response cache decision (hit, miss, stale, bypass, stored, rejected)
pub fn record_response_cache(outcome: &str) {
    if !enabled() {
        return;
    }
    counter!(
        "tiered_cache_response_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    tier: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(tier: &'static str, operation: &'static str) -> Self {
        Self {
            tier,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.tier, self.operation, self.start.elapsed());
    }
}
