// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Catalog Cache
//!
//! A two-tier read-through/write-through cache for catalog data, with
//! tag-based invalidation and circuit breaking around the shared tier.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CacheOrchestrator                        │
//! │  • get / set / delete                                      │
//! │  • invalidate_by_tags / delete_by_pattern / clear          │
//! │  • health / metrics                                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Local: In-Process LRU                    │
//! │  • Bounded entry count, least recently used evicted first  │
//! │  • Per-entry TTL, lazy expiry                              │
//! │  • Never fails, never does I/O                             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                 (skipped while the breaker is open)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Remote: Redis                           │
//! │  • Shared across instances, server-side TTL                │
//! │  • Tag index: tag → keys and key → tags SETs               │
//! │  • Cursor scans for pattern deletion                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Payloads are JSON, zstd-compressed above a size threshold, and prefixed
//! with a one-byte marker. Remote failures are absorbed: a read becomes a
//! miss and a write stays local. After repeated failures the breaker opens,
//! the remote tier is skipped, and a single background probe closes it again
//! once Redis answers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use catalog_cache::{keys, CacheConfig, CacheOrchestrator};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CacheConfig {
//!         redis_url: Some("redis://localhost:6379".into()),
//!         key_prefix: "catalog:".into(),
//!         ..Default::default()
//!     };
//!     let cache = CacheOrchestrator::connect(config).await?;
//!
//!     let key = keys::entity_key("products", 42);
//!     let tag = keys::entity_tag("products", 42);
//!     cache.set(&key, &json!({"id": 42, "name": "Runner"}), 300, &[tag.as_str()]).await?;
//!
//!     if let Some(product) = cache.get::<serde_json::Value>(&key).await {
//!         println!("Found: {product}");
//!     }
//!
//!     // After the product changes
//!     cache.invalidate_by_tags(&[tag.as_str()]).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: the [`CacheOrchestrator`] tying the tiers together
//! - [`local`]: in-process LRU tier
//! - [`storage`]: remote tier contract and backends (Redis, memory)
//! - [`tags`]: tag index over the remote tier
//! - [`codec`]: payload encoding and compression
//! - [`resilience`]: circuit breaker, startup retry
//! - [`keys`]: key and tag naming conventions
//! - [`pattern`]: Redis-style glob matching

pub mod codec;
pub mod config;
pub mod coordinator;
pub mod keys;
pub mod local;
pub mod metrics;
pub mod pattern;
pub mod resilience;
pub mod storage;
pub mod tags;

pub use codec::{Codec, CodecError};
pub use config::{CacheConfig, ConfigError};
pub use coordinator::{CacheError, CacheMetrics, CacheOrchestrator, HealthCheck};
pub use local::{CacheEntry, LocalTier};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitSnapshot, CircuitState};
pub use resilience::retry::RetryConfig;
pub use storage::memory::InMemoryRemote;
pub use storage::redis::RedisTier;
pub use storage::traits::{KeyScan, RemoteError, RemoteTier, ScanPage};
pub use tags::{TagIndex, TagInvalidation};
pub use metrics::LatencyTimer;
