//! # Tiered Cache
//!
//! A two-tier cache: a bounded in-process memory tier in front of a shared
//! Redis tier, with strategy-driven TTL policy, event instrumentation and
//! an HTTP response cache on top.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ResponseCache                          │
//! │  • Keys from method / path / query / vary headers / user    │
//! │  • Cache-Control gating, ETag / If-None-Match               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      CacheService                           │
//! │  • get / set / del, get_or_set with per-key coalescing      │
//! │  • Strategy → TTL and tier selection                        │
//! │  • Pattern invalidation, health, stats                      │
//! └─────────────────────────────────────────────────────────────┘
//!                │                               │
//!                ▼                               ▼
//! ┌───────────────────────────┐   ┌─────────────────────────────┐
//! │   Memory: MemoryCache     │   │   Redis: RemoteClient       │
//! │  • DashMap, max_keys      │   │  • Lazy connect, timeouts   │
//! │  • TTL sweeper, eviction  │   │  • Background reconnect     │
//! └───────────────────────────┘   │  • zstd payloads            │
//!                                 └─────────────────────────────┘
//! ```
//!
//! Reads try memory, then Redis (backfilling memory). Writes go to every
//! enabled tier; a tier failure never fails the call. While Redis is down
//! the service keeps serving from memory and reports `Degraded`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tiered_cache::{CacheConfig, CacheOptions, CacheService, CacheStrategy};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Environment preset, then cache.toml, then CACHE_* variables
//!     let cache = CacheService::open(CacheConfig::load()?).await?;
//!
//!     let options = CacheOptions::strategy(CacheStrategy::UserData);
//!     cache.set("user:42:profile", &serde_json::json!({"name": "Ada"}), &options).await;
//!
//!     let profile = cache.get::<serde_json::Value>("user:42:profile", &options).await;
//!     println!("{:?} from {:?}", profile.value, profile.source);
//!
//!     cache.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`service`]: the [`CacheService`] façade
//! - [`memory`]: the in-process tier
//! - [`client`]: the Redis tier state machine over a [`storage`] backend
//! - [`response`]: HTTP response caching
//! - [`handlers`]: management endpoints for an admin router
//! - [`config`], [`strategy`], [`options`]: layered configuration and per-call policy
//! - [`events`], [`monitoring`], [`metrics`]: instrumentation
//! - [`resilience`]: retry with backoff

pub mod client;
pub mod compression;
pub mod config;
pub mod entry;
pub mod error;
pub mod events;
pub mod handlers;
pub mod memory;
pub mod metrics;
pub mod monitoring;
pub mod options;
pub mod resilience;
pub mod response;
pub mod service;
pub mod storage;
pub mod strategy;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use client::{RemoteClient, RemoteClientOptions, RemoteState, RemoteStats};
pub use config::{CacheConfig, Environment, MemoryConfig, RedisConfig, ResponseCacheConfig};
pub use entry::{CacheEntry, CacheResult, CacheSource};
pub use error::{CacheError, CodecError, ConfigError, StorageError};
pub use events::{CacheEvent, CacheEventKind, EventSource, ListenerId};
pub use memory::{MemoryCache, MemoryStats};
pub use metrics::LatencyTimer;
pub use options::{CacheOptions, ResolvedOptions};
pub use resilience::retry::RetryConfig;
pub use response::{CachedResponse, RequestParts, ResponseCache};
pub use service::{CacheHealth, CacheMetrics, CacheService, CacheStats, HealthStatus, ListenerHandle};
pub use storage::memory::InMemoryStore;
pub use storage::redis::RedisStore;
pub use storage::traits::{KeyTtl, RemoteStore};
pub use strategy::{CacheStrategy, StrategyPolicy, StrategyTable};
