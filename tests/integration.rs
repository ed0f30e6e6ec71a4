//! Integration Tests for Catalog Cache
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
//! - `happy_*` - Normal operation: lifecycle, tags, scans, compression
//! - `failure_*` - Failure scenarios: Redis death, breaker trips

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use catalog_cache::{
    keys, CacheConfig, CacheOrchestrator, CircuitState, RedisTier, RemoteTier,
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

/// Unique prefix so tests sharing a database never see each other's keys
fn unique_prefix(name: &str) -> String {
    format!("test:{}:{}:", name, uuid::Uuid::new_v4())
}

fn config_for(port: u16, prefix: &str) -> CacheConfig {
    CacheConfig {
        redis_url: Some(format!("redis://127.0.0.1:{}", port)),
        key_prefix: prefix.to_string(),
        local_max_entries: 1_000,
        remote_timeout_ms: 500,
        breaker_cooldown_ms: 60_000,
        ..Default::default()
    }
}

// =============================================================================
// Happy Path Tests - Normal Operation
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_cache_lifecycle_with_redis() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);

    let cache = CacheOrchestrator::connect(config_for(port, &unique_prefix("lifecycle")))
        .await
        .expect("Should connect to Redis");
    assert!(cache.health().remote_connected);

    // Write-through and read back
    for id in 0..10u64 {
        let tags = [keys::entity_tag("products", id), keys::list_tag("products")];
        let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
        cache
            .set(&keys::entity_key("products", id), &json!({"id": id}), 60, &tags)
            .await
            .expect("Should encode");
    }
    cache.set("users:1", &json!({"id": 1}), 60, &[]).await.unwrap();

    let product: serde_json::Value = cache.get("products:3").await.expect("Should hit");
    assert_eq!(product["id"], 3);

    // A second instance on the same prefix reads through to Redis
    let other = CacheOrchestrator::connect(cache.config().clone()).await.unwrap();
    let shared: serde_json::Value = other.get("products:4").await.expect("Should hit remote");
    assert_eq!(shared["id"], 4);
    assert_eq!(other.metrics().remote_hits, 1);

    // Entity tag removes exactly one product
    assert_eq!(cache.invalidate_by_tags(&["products:3"]).await, 1);
    assert!(cache.get::<serde_json::Value>("products:3").await.is_none());

    // Pattern deletion leaves other entities alone
    assert_eq!(cache.delete_by_pattern("products:*").await, 9);
    assert!(cache.get::<serde_json::Value>("products:7").await.is_none());
    assert!(cache.get::<serde_json::Value>("users:1").await.is_some());

    // Clear under a prefix only removes that prefix
    cache.clear().await;
    assert!(cache.get::<serde_json::Value>("users:1").await.is_none());
    assert_eq!(cache.circuit_state(), CircuitState::Closed);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_tag_index_is_cleaned_on_delete() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);

    let prefix = unique_prefix("tags");
    let tier = RedisTier::connect(&format!("redis://127.0.0.1:{}", port), &prefix, Duration::from_millis(500))
        .await
        .expect("Should connect");
    let tier: Arc<dyn RemoteTier> = Arc::new(tier);
    let cache = CacheOrchestrator::new(config_for(port, &prefix), Some(tier.clone())).unwrap();

    cache.set("products:1", &1, 60, &["category:shoes", "sale"]).await.unwrap();
    cache.set("products:2", &2, 60, &["category:shoes"]).await.unwrap();

    let members = tier.members_of_tag("category:shoes").await.unwrap();
    assert_eq!(members, HashSet::from(["products:1".to_string(), "products:2".to_string()]));

    cache.delete("products:1").await;

    let members = tier.members_of_tag("category:shoes").await.unwrap();
    assert_eq!(members, HashSet::from(["products:2".to_string()]));
    assert!(tier.members_of_tag("sale").await.unwrap().is_empty());
    assert!(tier.tags_of_key("products:1").await.unwrap().is_empty());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_scan_skips_reserved_namespaces() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);

    let tier = RedisTier::connect(
        &format!("redis://127.0.0.1:{}", port),
        &unique_prefix("scan"),
        Duration::from_millis(500),
    )
    .await
    .expect("Should connect");

    for i in 0..25 {
        let key = format!("products:{i}");
        tier.set_with_ttl(&key, b"\x00{}", 60).await.unwrap();
        tier.add_key_to_tag("all", &key, 60).await.unwrap();
    }

    let remote: &dyn RemoteTier = &tier;
    let mut scan = remote.scan_keys_matching("*", 10);
    let mut seen = HashSet::new();
    while let Some(batch) = scan.next_batch().await.unwrap() {
        seen.extend(batch);
    }

    assert!(scan.is_finished());
    assert_eq!(seen.len(), 25);
    assert!(seen.iter().all(|k| k.starts_with("products:")), "tag sets leaked: {seen:?}");
}

#[cfg(feature = "compression")]
#[tokio::test]
#[ignore] // Requires Docker
async fn happy_large_values_roundtrip_compressed() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);

    let prefix = unique_prefix("compress");
    let tier = RedisTier::connect(&format!("redis://127.0.0.1:{}", port), &prefix, Duration::from_millis(500))
        .await
        .unwrap();
    let tier: Arc<dyn RemoteTier> = Arc::new(tier);
    let cache = CacheOrchestrator::new(config_for(port, &prefix), Some(tier.clone())).unwrap();

    let description = "lorem ipsum dolor sit amet ".repeat(200);
    let value = json!({"id": 1, "description": description});
    cache.set("products:big", &value, 60, &[]).await.unwrap();

    let raw = tier.get("products:big").await.unwrap().expect("Stored remotely");
    assert_eq!(raw[0], catalog_cache::codec::MARKER_ZSTD);
    assert!(raw.len() < description.len());

    let other = CacheOrchestrator::new(cache.config().clone(), Some(tier)).unwrap();
    assert_eq!(other.get::<serde_json::Value>("products:big").await, Some(value));
}

// =============================================================================
// Failure Scenario Tests
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn failure_redis_dies_mid_operation() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);

    let cache = CacheOrchestrator::connect(config_for(port, &unique_prefix("death")))
        .await
        .expect("Should connect");

    for i in 0..5 {
        cache.set(&format!("before-kill-{i}"), &i, 60, &[]).await.unwrap();
    }

    // Kill Redis!
    drop(redis);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Writes keep working locally
    for i in 0..5 {
        cache
            .set(&format!("after-kill-{i}"), &i, 60, &[])
            .await
            .expect("Should accept writes with dead Redis");
    }
    assert_eq!(cache.get::<i32>("after-kill-2").await, Some(2));
    assert_eq!(cache.get::<i32>("before-kill-1").await, Some(1));

    // Remote misses fail until the breaker opens
    for i in 0..10 {
        assert!(cache.get::<i32>(&format!("never-set-{i}")).await.is_none());
    }
    assert_eq!(cache.circuit_state(), CircuitState::Open);

    let health = cache.health();
    assert!(!health.healthy);
    assert!(!health.remote_connected);
    assert!(cache.metrics().remote_skipped > 0);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn failure_connect_to_missing_redis_fails() {
    let config = CacheConfig {
        redis_url: Some("redis://127.0.0.1:1".into()),
        ..Default::default()
    };

    let result = tokio::time::timeout(Duration::from_secs(30), CacheOrchestrator::connect(config)).await;
    assert!(matches!(result, Ok(Err(_))), "startup retry should give up");
}
