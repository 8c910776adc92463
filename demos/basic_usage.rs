// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic tiered-cache usage example.
//!
//! Demonstrates:
//! 1. Opening the cache against a local Redis (falls back to memory if absent)
//! 2. Strategy-driven writes and reads, with the tier that answered
//! 3. `get_or_set` coalescing concurrent callers onto one producer call
//! 4. HTTP response caching with ETag revalidation
//! 5. Pattern invalidation
//! 6. Health, stats and the recorded metrics
//!
//! # Prerequisites
//!
//! Optional: a Redis on localhost.
//! ```bash
//! docker run --rm -p 6379:6379 redis:7-alpine
//! ```
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::time::{Duration, Instant};

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;
use tiered_cache::response::{CachedResponse, RequestParts, ResponseCache};
use tiered_cache::{CacheConfig, CacheOptions, CacheService, CacheStrategy, Environment};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tiered_cache=info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║            tiered-cache: Basic Usage Example                  ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Open
    // ─────────────────────────────────────────────────────────────────────────
    let mut config = CacheConfig::load_layers(Environment::Development, None)?;
    config.redis.key_prefix = "demo:".into();
    config.redis.lazy_connect = false;
    config.redis.max_reconnect_attempts = 1;
    config.redis.connect_timeout_ms = 500;

    let cache = CacheService::open(config).await?;
    println!("📦 Opened. Health: {}", cache.health().status);

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Strategy-driven writes and reads
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Writing user profiles (UserData strategy)...");
    let opts = CacheOptions::strategy(CacheStrategy::UserData);
    for (id, name) in [(1, "Ada"), (2, "Grace"), (3, "Barbara")] {
        cache.set(&format!("user:{id}:profile"), &json!({ "id": id, "name": name }), &opts).await;
    }

    for id in 1..=4 {
        let start = Instant::now();
        let read = cache.get::<serde_json::Value>(&format!("user:{id}:profile"), &opts).await;
        match read.value {
            Some(value) => println!(
                "   └─ user:{id} → {value} from {} ({:?})",
                read.source.map_or("?", |s| s.as_str()),
                start.elapsed()
            ),
            None => println!("   └─ user:{id} → miss ({:?})", start.elapsed()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. get_or_set
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🧮 Ten concurrent get_or_set calls for one slow query...");
    let mut handles = Vec::new();
    for _ in 0..10 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_set(
                    "stats:users:count",
                    || async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<u64, String>(1_337)
                    },
                    &CacheOptions::strategy(CacheStrategy::DatabaseQuery),
                )
                .await
        }));
    }
    for handle in handles {
        handle.await??;
    }
    let metrics = cache.metrics();
    println!("   └─ producer calls: {}, coalesced: {}", metrics.producer_calls, metrics.coalesced);

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Response caching
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🌐 Caching an HTTP response...");
    let responses = ResponseCache::new(cache.clone());
    let request = RequestParts::new("GET", "/api/items").with_query("page=1&sort=name");
    let response = CachedResponse::new(200, br#"{"items":["a","b"]}"#.to_vec())
        .with_header("content-type", "application/json")
        .with_header("cache-control", "public, max-age=120");
    println!("   └─ stored: {}", responses.set(&request, response).await);

    let lookup = responses.get(&request).await;
    if let Some(stored) = &lookup.response {
        let etag = stored.etag.clone().unwrap_or_default();
        println!("   └─ hit {} (etag {etag})", lookup.key);
        let revalidation = request.clone().with_header("If-None-Match", etag);
        println!("   └─ 304 Not Modified: {}", responses.is_not_modified(&revalidation, stored));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Invalidation
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🧹 Invalidating user:* ...");
    let removed = cache.invalidate_by_pattern("user:*").await;
    println!("   └─ removed {removed} keys");

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Health, stats, metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📊 Stats:");
    println!("{}", serde_json::to_string_pretty(&cache.stats())?);
    println!("\n🩺 Health:");
    println!("{}", serde_json::to_string_pretty(&cache.health())?);

    println!("\n📈 Recorded metrics:");
    dump_metrics(&snapshotter);

    cache.close().await;
    println!("\n👋 Closed.\n");
    Ok(())
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<String> = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let labels = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        let rendered = match value {
            DebugValue::Counter(v) => format!("{v}"),
            DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
            DebugValue::Histogram(samples) if samples.is_empty() => "(no samples)".to_string(),
            DebugValue::Histogram(samples) => {
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                format!("count={} avg={:.6}", samples.len(), sum / samples.len() as f64)
            }
        };
        lines.push(format!("{}{} = {}", key.name(), labels, rendered));
    }

    lines.sort();
    if lines.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
    for line in lines {
        println!("   └─ {line}");
    }
}
