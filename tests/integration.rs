//! Integration Tests for Tiered Cache
//!
//! Tests that need a real Redis. They use testcontainers, so no external
//! docker-compose is required.
//!
//! # Running Tests
//! ```bash
//! # Run all integration tests (requires Docker)
//! cargo test --test integration -- --ignored
//!
//! # Run only happy-path tests
//! cargo test --test integration happy -- --ignored
//!
//! # Run only failure scenario tests
//! cargo test --test integration failure -- --ignored
//! ```
//!
//! # Test Organization
//! - `happy_*` - Normal operation: lifecycle, tiers, prefixes, invalidation
//! - `failure_*` - Failure scenarios: Redis death, unreachable Redis

use std::time::Duration;

use serde_json::json;

use tiered_cache::response::{CachedResponse, RequestParts, ResponseCache};
use tiered_cache::{
    CacheConfig, CacheOptions, CacheService, CacheSource, CacheStrategy, Environment, HealthStatus, RedisStore,
    RemoteState, RemoteStore,
};

use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

// =============================================================================
// Container Helpers
// =============================================================================

/// Create a Redis container with health check
fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

fn redis_config(port: u16, prefix: &str) -> CacheConfig {
    let mut config = CacheConfig::for_environment(Environment::Test);
    config.redis.enabled = true;
    config.redis.lazy_connect = false;
    config.redis.url = Some(format!("redis://127.0.0.1:{port}"));
    config.redis.key_prefix = prefix.to_string();
    config.redis.max_reconnect_attempts = 5;
    config.redis.reconnect_base_delay_ms = 50;
    config.redis.reconnect_max_delay_ms = 200;
    config
}

fn unique_prefix(name: &str) -> String {
    format!("test:{}:{}:", name, uuid::Uuid::new_v4())
}

// =============================================================================
// Happy Path Tests - Normal Operation
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_open_set_get_close() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);

    let cache = CacheService::open(redis_config(port, &unique_prefix("lifecycle")))
        .await
        .expect("open");
    assert_eq!(cache.remote().unwrap().state(), RemoteState::Ready);
    assert_eq!(cache.health().status, HealthStatus::Healthy);

    let opts = CacheOptions::strategy(CacheStrategy::UserData);
    assert!(cache.set("user:1", &json!({"name": "Ada"}), &opts).await);

    let read = cache.get::<serde_json::Value>("user:1", &opts).await;
    assert_eq!(read.value, Some(json!({"name": "Ada"})));
    assert_eq!(read.source, Some(CacheSource::Memory));

    // Evict from memory and read through Redis
    cache.memory().del("user:1");
    let read = cache.get::<serde_json::Value>("user:1", &opts).await;
    assert_eq!(read.source, Some(CacheSource::Redis));
    assert!(cache.memory().has("user:1"), "redis hit should backfill memory");

    cache.close().await;
    assert_eq!(cache.health().status, HealthStatus::Unhealthy);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_key_prefix_is_applied_and_stripped() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);
    let url = format!("redis://127.0.0.1:{port}");

    let prefix = unique_prefix("prefix");
    let cache = CacheService::open(redis_config(port, &prefix)).await.unwrap();
    cache.set("a", &1, &CacheOptions::redis_only()).await;

    // A raw store without prefix sees the namespaced key
    let raw = RedisStore::new(&url, None).unwrap();
    raw.connect().await.unwrap();
    assert!(raw.exists(&format!("{prefix}a")).await.unwrap());

    // The service sees it under its own name
    let keys = cache.remote().unwrap().keys("*").await;
    assert_eq!(keys, vec!["a".to_string()]);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_compressed_payloads_roundtrip() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);

    let cache = CacheService::open(redis_config(port, &unique_prefix("zstd"))).await.unwrap();
    let big = json!({ "text": "lorem ipsum ".repeat(2_000) });
    let opts = CacheOptions::redis_only().with_compression(true);

    assert!(cache.set("ai:answer", &big, &opts).await);
    assert_eq!(cache.get::<serde_json::Value>("ai:answer", &opts).await.value, Some(big));
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_invalidate_by_pattern_across_tiers() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);

    let cache = CacheService::open(redis_config(port, &unique_prefix("invalidate"))).await.unwrap();
    for i in 0..600 {
        cache.set(&format!("session:{i}"), &i, &CacheOptions::redis_only()).await;
    }
    cache.set("session:memory", &0, &CacheOptions::memory_only()).await;
    cache.set("user:1", &1, &CacheOptions::new()).await;

    // SCAN pages and chunked deletes
    assert_eq!(cache.invalidate_by_pattern("session:*").await, 601);
    assert!(cache.get::<u32>("user:1", &CacheOptions::redis_only()).await.hit);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_ttl_expiry_in_redis() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);

    let cache = CacheService::open(redis_config(port, &unique_prefix("ttl"))).await.unwrap();
    let opts = CacheOptions::redis_only().with_ttl(1);
    cache.set("short", &"lived", &opts).await;

    let ttl = cache.remote().unwrap().ttl("short").await.and_then(|t| t.as_secs());
    assert!(matches!(ttl, Some(0..=1)));

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(!cache.get::<String>("short", &opts).await.hit);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_response_cache_shared_between_instances() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);
    let prefix = unique_prefix("response");

    let a = ResponseCache::new(CacheService::open(redis_config(port, &prefix)).await.unwrap());
    let b = ResponseCache::new(CacheService::open(redis_config(port, &prefix)).await.unwrap());

    let request = RequestParts::new("GET", "/api/items").with_query("page=1");
    let response = CachedResponse::new(200, b"[1,2,3]".to_vec()).with_header("cache-control", "max-age=60");
    assert!(a.set(&request, response).await);

    let lookup = b.get(&request).await;
    assert_eq!(lookup.source, Some(CacheSource::Redis));
    assert_eq!(lookup.response.unwrap().body, b"[1,2,3]");

    assert_eq!(b.invalidate_by_path("/api/items").await, 1);
    assert!(!b.get(&request).await.is_hit());
}

// =============================================================================
// Failure Scenario Tests
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn failure_redis_death_degrades_to_memory() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);

    let mut config = redis_config(port, &unique_prefix("death"));
    config.redis.max_reconnect_attempts = 3;
    config.redis.command_timeout_ms = 200;
    let cache = CacheService::open(config).await.unwrap();
    cache.set("k", &1, &CacheOptions::new()).await;

    // Kill Redis mid-run
    redis.stop();
    cache.set("k2", &2, &CacheOptions::new()).await;
    cache.set("k3", &3, &CacheOptions::new()).await;

    let read = cache.get::<u32>("k", &CacheOptions::new()).await;
    assert_eq!(read.value, Some(1), "memory must keep serving");
    assert_eq!(cache.get::<u32>("k3", &CacheOptions::new()).await.source, Some(CacheSource::Fallback));
    assert_eq!(cache.health().status, HealthStatus::Degraded);

    let mut rx = cache.remote().unwrap().state_receiver();
    tokio::time::timeout(Duration::from_secs(30), async {
        while *rx.borrow_and_update() != RemoteState::Failed {
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("reconnect attempts should run out");
    assert_eq!(cache.health().status, HealthStatus::Degraded);
    cache.close().await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn failure_unreachable_redis_at_startup() {
    // Nothing listens on this port
    let mut config = redis_config(1, &unique_prefix("unreachable"));
    config.redis.max_reconnect_attempts = 1;
    config.redis.connect_timeout_ms = 200;

    let cache = CacheService::open(config).await.expect("open must not fail on connect errors");
    assert_ne!(cache.remote().unwrap().state(), RemoteState::Ready);
    assert!(cache.set("k", &1, &CacheOptions::new()).await);
    assert_eq!(cache.get::<u32>("k", &CacheOptions::new()).await.value, Some(1));
}
