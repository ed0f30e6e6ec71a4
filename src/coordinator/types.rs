//! Public types for the cache orchestrator.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use thiserror::Error;

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::resilience::circuit_breaker::CircuitState;
use crate::storage::traits::RemoteError;

/// Internal error union.
///
/// Helpers return `Result<Option<T>, CacheError>` so a miss and a failure stay
/// distinct; the public operations collapse both into "absent". Only
/// construction hands a `CacheError` to the caller.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("circuit breaker open, remote tier skipped")]
    CircuitOpen,

    #[error("no remote tier configured")]
    LocalOnly,

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Health snapshot for readiness probes and admin endpoints.
///
/// Built from cached state only; producing it never touches the network.
///
/// # Example
///
/// ```rust,ignore
/// let health = cache.health();
///
/// // Degraded still serves from the local tier
/// if !health.healthy {
///     warn!(circuit = %health.circuit_state, "catalog cache degraded");
/// }
///
/// HttpResponse::Ok().json(health)
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Remote tier configured and breaker closed (always true in local-only mode)
    pub healthy: bool,
    pub remote_configured: bool,
    /// Outcome of the most recent remote call or probe
    pub remote_connected: bool,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub local_entries: usize,
    pub local_capacity: usize,
}

/// Point-in-time counters since the orchestrator was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheMetrics {
    pub local_hits: u64,
    pub remote_hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub remote_errors: u64,
    pub codec_errors: u64,
    /// Remote calls not made because the breaker was open
    pub remote_skipped: u64,
    pub tag_invalidations: u64,
    pub keys_invalidated: u64,
    pub pattern_deletions: u64,
    pub local_entries: usize,
    pub local_capacity: usize,
    pub local_evictions: u64,
    pub circuit_open: bool,
    pub circuit_trips: u64,
}

impl CacheMetrics {
    /// Fraction of reads served by either tier (0.0 - 1.0).
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.local_hits + self.remote_hits;
        let total = hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }
}

#[derive(Debug, Default)]
pub(super) struct Counters {
    pub local_hits: AtomicU64,
    pub remote_hits: AtomicU64,
    pub misses: AtomicU64,
    pub sets: AtomicU64,
    pub deletes: AtomicU64,
    pub remote_errors: AtomicU64,
    pub codec_errors: AtomicU64,
    pub remote_skipped: AtomicU64,
    pub tag_invalidations: AtomicU64,
    pub keys_invalidated: AtomicU64,
    pub pattern_deletions: AtomicU64,
}

impl Counters {
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Fill the counter fields of a snapshot.
    pub fn snapshot_into(&self, out: &mut CacheMetrics) {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        out.local_hits = load(&self.local_hits);
        out.remote_hits = load(&self.remote_hits);
        out.misses = load(&self.misses);
        out.sets = load(&self.sets);
        out.deletes = load(&self.deletes);
        out.remote_errors = load(&self.remote_errors);
        out.codec_errors = load(&self.codec_errors);
        out.remote_skipped = load(&self.remote_skipped);
        out.tag_invalidations = load(&self.tag_invalidations);
        out.keys_invalidated = load(&self.keys_invalidated);
        out.pattern_deletions = load(&self.pattern_deletions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let empty = CacheMetrics::default();
        assert_eq!(empty.hit_rate(), 0.0);

        let metrics = CacheMetrics {
            local_hits: 6,
            remote_hits: 2,
            misses: 2,
            ..Default::default()
        };
        assert!((metrics.hit_rate() - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = Counters::default();
        Counters::bump(&counters.sets);
        Counters::bump(&counters.sets);
        Counters::add(&counters.keys_invalidated, 5);

        let mut snapshot = CacheMetrics::default();
        counters.snapshot_into(&mut snapshot);

        assert_eq!(snapshot.sets, 2);
        assert_eq!(snapshot.keys_invalidated, 5);
        assert_eq!(snapshot.deletes, 0);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(CacheError::LocalOnly.to_string(), "no remote tier configured");
        let remote = CacheError::from(RemoteError::Backend("WRONGTYPE".into()));
        assert_eq!(remote.to_string(), "remote tier backend error: WRONGTYPE");
    }
}
