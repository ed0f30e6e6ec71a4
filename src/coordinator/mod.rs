// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache orchestrator.
//!
//! The [`CacheOrchestrator`] ties the components together:
//! - Local tier: bounded in-process LRU, always consulted first
//! - Remote tier: shared Redis (or any [`RemoteTier`]) with server-side TTL
//! - Tag index: bulk invalidation scopes kept on the remote tier
//! - Circuit breaker: skips the remote tier after repeated failures
//!
//! Remote failures never reach the caller. A read that cannot be served
//! becomes a miss and a write is at least locally effective.
//!
//! # Example
//!
//! ```rust,no_run
//! use catalog_cache::{CacheConfig, CacheOrchestrator};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Product { id: u64, name: String }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CacheConfig {
//!     redis_url: Some("redis://localhost:6379".into()),
//!     key_prefix: "catalog:".into(),
//!     ..Default::default()
//! };
//! let cache = CacheOrchestrator::connect(config).await?;
//!
//! let shoe = Product { id: 1, name: "Runner".into() };
//! cache.set("products:1", &shoe, 300, &["products:1", "category:shoes"]).await?;
//!
//! let cached: Option<Product> = cache.get("products:1").await;
//! assert!(cached.is_some());
//!
//! // On update of anything in the category
//! cache.invalidate_by_tags(&["category:shoes"]).await;
//! # Ok(())
//! # }
//! ```

mod api;
mod invalidation;
mod types;

pub use types::{CacheError, CacheMetrics, HealthCheck};

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::Codec;
use crate::config::{CacheConfig, ConfigError};
use crate::local::LocalTier;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitState};
use crate::storage::redis::RedisTier;
use crate::storage::traits::{RemoteError, RemoteTier};
use crate::tags::TagIndex;

use types::Counters;

/// The remote tier together with the tag index it hosts.
pub(super) struct Remote {
    pub(super) tier: Arc<dyn RemoteTier>,
    pub(super) tags: TagIndex,
}

/// Two-tier cache with tag invalidation and remote failure isolation.
///
/// # Thread Safety
///
/// `Send + Sync`; share it behind an `Arc`. Breaker and counters are
/// atomics or short critical sections, and the local tier is a single
/// mutex-guarded LRU that is never held across an await.
pub struct CacheOrchestrator {
    pub(super) config: CacheConfig,
    pub(super) codec: Codec,
    pub(super) local: Arc<LocalTier>,
    pub(super) remote: Option<Remote>,
    pub(super) breaker: Arc<CircuitBreaker>,
    /// Last observed remote connectivity (cached, no I/O)
    pub(super) remote_connected: Arc<AtomicBool>,
    pub(super) counters: Counters,
    probe_task: Mutex<Option<JoinHandle<()>>>,
    sweep_task: Option<JoinHandle<()>>,
}

impl CacheOrchestrator {
    /// Build an orchestrator over an already connected remote tier.
    ///
    /// `None` runs in local-only mode. Fails only on invalid configuration.
    pub fn new(config: CacheConfig, remote: Option<Arc<dyn RemoteTier>>) -> Result<Self, ConfigError> {
        config.validate()?;

        let capacity = NonZeroUsize::new(config.local_max_entries).ok_or(ConfigError::ZeroCapacity)?;
        let local = Arc::new(LocalTier::new(capacity));
        let codec = Codec::new(config.compression_threshold_bytes, config.compression_level);
        let breaker = Arc::new(CircuitBreaker::new(
            "remote",
            CircuitConfig {
                failure_threshold: config.breaker_failure_threshold,
                recovery_timeout: config.breaker_cooldown(),
            },
        ));

        let remote_configured = remote.is_some();
        let remote = remote.map(|tier| Remote {
            tags: TagIndex::new(tier.clone()),
            tier,
        });

        let sweep_task = config
            .sweep_interval()
            .and_then(|every| spawn_sweep(local.clone(), every));

        crate::metrics::set_remote_connected(remote_configured);
        crate::metrics::set_circuit_state(breaker.name(), CircuitState::Closed);
        info!(
            local_max_entries = config.local_max_entries,
            remote_configured,
            failure_threshold = config.breaker_failure_threshold,
            cooldown_ms = config.breaker_cooldown_ms,
            "Catalog cache created"
        );

        Ok(Self {
            config,
            codec,
            local,
            remote,
            breaker,
            remote_connected: Arc::new(AtomicBool::new(remote_configured)),
            counters: Counters::default(),
            probe_task: Mutex::new(None),
            sweep_task,
        })
    }

    /// Validate config, connect to Redis if `redis_url` is set, and build.
    ///
    /// The initial connection is retried with backoff; a Redis that stays
    /// unreachable fails construction.
    pub async fn connect(config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;

        let remote: Option<Arc<dyn RemoteTier>> = match config.redis_url.as_deref() {
            Some(url) => {
                let tier = RedisTier::connect(url, &config.key_prefix, config.remote_timeout()).await?;
                Some(Arc::new(tier))
            }
            None => {
                info!("No redis_url configured, running local-only");
                None
            }
        };

        Ok(Self::new(config, remote)?)
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// The remote tier and tag index, if configured and the breaker allows a call.
    pub(super) fn remote_for(&self, operation: &'static str) -> Result<&Remote, CacheError> {
        let remote = self.remote.as_ref().ok_or(CacheError::LocalOnly)?;
        if self.breaker.allow() {
            Ok(remote)
        } else {
            Counters::bump(&self.counters.remote_skipped);
            crate::metrics::record_operation("remote", operation, "skipped");
            Err(CacheError::CircuitOpen)
        }
    }

    /// Report a remote call outcome to the breaker, passing the result through.
    pub(super) fn observe<T>(&self, operation: &'static str, result: Result<T, RemoteError>) -> Result<T, RemoteError> {
        match &result {
            Ok(_) => self.on_remote_success(),
            Err(e) => self.on_remote_failure(operation, e),
        }
        result
    }

    pub(super) fn on_remote_success(&self) {
        self.breaker.record_success();
        if !self.remote_connected.swap(true, Ordering::Relaxed) {
            crate::metrics::set_remote_connected(true);
        }
    }

    pub(super) fn on_remote_failure(&self, operation: &'static str, error: &RemoteError) {
        Counters::bump(&self.counters.remote_errors);
        crate::metrics::record_remote_error(operation, error.kind());
        warn!(operation, error = %error, "Remote tier call failed");

        if self.remote_connected.swap(false, Ordering::Relaxed) {
            crate::metrics::set_remote_connected(false);
        }
        if self.breaker.record_failure() {
            self.schedule_probe();
        }
    }

    /// Spawn the recovery probe loop unless one is already pending.
    ///
    /// The loop waits one cooldown, pings, and repeats until a ping succeeds.
    fn schedule_probe(&self) {
        if !self.breaker.try_schedule_probe() {
            return;
        }
        let Some(remote) = self.remote.as_ref().map(|r| r.tier.clone()) else {
            self.breaker.release_probe();
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime, recovery probe not scheduled");
            self.breaker.release_probe();
            return;
        };

        let breaker = self.breaker.clone();
        let connected = self.remote_connected.clone();
        let cooldown = breaker.config().recovery_timeout;
        debug!(cooldown = ?cooldown, "Scheduling remote recovery probe");

        let task = runtime.spawn(async move {
            loop {
                tokio::time::sleep(cooldown).await;
                match remote.ping().await {
                    Ok(()) => {
                        breaker.record_probe(true);
                        connected.store(true, Ordering::Relaxed);
                        crate::metrics::set_remote_connected(true);
                        break;
                    }
                    Err(e) => {
                        debug!(error = %e, "Recovery probe failed");
                        breaker.record_probe(false);
                    }
                }
            }
        });

        if let Some(previous) = self.probe_task.lock().replace(task) {
            previous.abort();
        }
    }

    /// Health snapshot from cached state.
    #[must_use]
    pub fn health(&self) -> HealthCheck {
        let snapshot = self.breaker.snapshot();
        let remote_configured = self.remote.is_some();
        HealthCheck {
            healthy: !remote_configured || snapshot.state == CircuitState::Closed,
            remote_configured,
            remote_connected: remote_configured && self.remote_connected.load(Ordering::Relaxed),
            circuit_state: snapshot.state,
            consecutive_failures: snapshot.consecutive_failures,
            local_entries: self.local.len(),
            local_capacity: self.local.capacity(),
        }
    }

    /// Counter snapshot.
    #[must_use]
    pub fn metrics(&self) -> CacheMetrics {
        let mut metrics = CacheMetrics {
            local_entries: self.local.len(),
            local_capacity: self.local.capacity(),
            local_evictions: self.local.evictions(),
            circuit_open: self.breaker.state() == CircuitState::Open,
            circuit_trips: self.breaker.trips(),
            ..Default::default()
        };
        self.counters.snapshot_into(&mut metrics);
        metrics
    }
}

impl Drop for CacheOrchestrator {
    fn drop(&mut self) {
        if let Some(task) = self.probe_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.sweep_task.take() {
            task.abort();
        }
    }
}

fn spawn_sweep(local: Arc<LocalTier>, every: Duration) -> Option<JoinHandle<()>> {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!("No tokio runtime, local expiry sweep disabled");
        return None;
    };
    Some(runtime.spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let purged = local.purge_expired();
            if purged > 0 {
                debug!(purged, "Swept expired local entries");
            }
        }
    }))
}
