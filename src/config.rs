// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the catalog cache.
//!
//! # Example
//!
//! ```
//! use catalog_cache::CacheConfig;
//!
//! // Minimal config (local-only, defaults everywhere)
//! let config = CacheConfig::default();
//! assert_eq!(config.local_max_entries, 10_000);
//! assert!(config.validate().is_ok());
//!
//! // Redis-backed config
//! let config = CacheConfig {
//!     redis_url: Some("redis://localhost:6379".into()),
//!     key_prefix: "catalog:".into(),
//!     default_ttl_secs: 600,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;
use serde::Deserialize;
use thiserror::Error;

/// Longest TTL any tier stores (100 years). Longer requests are clamped to it.
pub const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Invalid configuration. Only ever raised while constructing the orchestrator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("local_max_entries must be greater than zero")]
    ZeroCapacity,
    #[error("default_ttl_secs must be greater than zero")]
    ZeroDefaultTtl,
    #[error("breaker_failure_threshold must be greater than zero")]
    ZeroFailureThreshold,
    #[error("breaker_cooldown_ms must be greater than zero")]
    ZeroCooldown,
    #[error("remote_timeout_ms must be greater than zero")]
    ZeroRemoteTimeout,
    #[error("scan_batch_size must be greater than zero")]
    ZeroScanBatch,
    #[error("compression_level {0} is outside 1..=22")]
    CompressionLevel(i32),
    #[error("invalid redis url '{url}': {reason}")]
    RedisUrl { url: String, reason: String },
}

/// Configuration for the catalog cache.
///
/// All fields have defaults. Leave `redis_url` unset to run on the
/// in-process tier alone.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Redis connection string (e.g., "redis://localhost:6379")
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Namespace prepended to every remote key (values and tag index sets)
    #[serde(default)]
    pub key_prefix: String,

    /// Local tier capacity in entries (default: 10 000)
    #[serde(default = "default_local_max_entries")]
    pub local_max_entries: usize,

    /// TTL applied when a caller passes 0 (default: 5 minutes)
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Serialized size above which payloads are compressed (default: 1 KiB)
    #[serde(default = "default_compression_threshold_bytes")]
    pub compression_threshold_bytes: usize,

    /// zstd level (default: 3)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    /// Consecutive remote failures before the breaker opens (default: 5)
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,

    /// Delay between recovery probes while open (default: 30s)
    #[serde(default = "default_breaker_cooldown_ms")]
    pub breaker_cooldown_ms: u64,

    /// Upper bound on any single remote call (default: 2s)
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,

    /// SCAN COUNT hint and per-batch delete size for pattern deletion
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,

    /// Background expiry sweep interval (0 = lazy expiry only)
    #[serde(default)]
    pub sweep_interval_ms: u64,
}

fn default_local_max_entries() -> usize { 10_000 }
fn default_ttl_secs() -> u64 { 300 }
fn default_compression_threshold_bytes() -> usize { 1024 }
fn default_compression_level() -> i32 { 3 }
fn default_breaker_failure_threshold() -> u32 { 5 }
fn default_breaker_cooldown_ms() -> u64 { 30_000 }
fn default_remote_timeout_ms() -> u64 { 2_000 }
fn default_scan_batch_size() -> usize { 100 }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: String::new(),
            local_max_entries: default_local_max_entries(),
            default_ttl_secs: default_ttl_secs(),
            compression_threshold_bytes: default_compression_threshold_bytes(),
            compression_level: default_compression_level(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_cooldown_ms: default_breaker_cooldown_ms(),
            remote_timeout_ms: default_remote_timeout_ms(),
            scan_batch_size: default_scan_batch_size(),
            sweep_interval_ms: 0,
        }
    }
}

impl CacheConfig {
    /// Reject values the cache cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_max_entries == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.default_ttl_secs == 0 {
            return Err(ConfigError::ZeroDefaultTtl);
        }
        if self.breaker_failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        if self.breaker_cooldown_ms == 0 {
            return Err(ConfigError::ZeroCooldown);
        }
        if self.remote_timeout_ms == 0 {
            return Err(ConfigError::ZeroRemoteTimeout);
        }
        if self.scan_batch_size == 0 {
            return Err(ConfigError::ZeroScanBatch);
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(ConfigError::CompressionLevel(self.compression_level));
        }
        if let Some(ref url) = self.redis_url {
            redis::Client::open(url.as_str()).map_err(|e| ConfigError::RedisUrl {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.effective_ttl_secs(0))
    }

    /// TTL actually stored for a caller TTL: 0 means the default, and
    /// anything longer than [`MAX_TTL_SECS`] is clamped.
    #[must_use]
    pub fn effective_ttl_secs(&self, ttl_secs: u64) -> u64 {
        let ttl_secs = if ttl_secs == 0 { self.default_ttl_secs } else { ttl_secs };
        ttl_secs.min(MAX_TTL_SECS)
    }

    #[must_use]
    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_millis(self.breaker_cooldown_ms)
    }

    #[must_use]
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    /// `None` when the background sweep is disabled.
    #[must_use]
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }
}
