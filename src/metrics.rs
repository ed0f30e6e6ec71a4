// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the catalog cache.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host service is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `catalog_cache_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `tier`: local, remote, all
//! - `operation`: get, set, delete, invalidate_tags, delete_pattern, clear
//! - `status`: hit, miss, success, error, skipped

use metrics::{counter, gauge, histogram};
use std::time::Duration;

use crate::resilience::circuit_breaker::CircuitState;

/// Record an operation outcome
pub fn record_operation(tier: &str, operation: &str, status: &str) {
    counter!(
        "catalog_cache_operations_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(tier: &str, operation: &str, duration: Duration) {
    histogram!(
        "catalog_cache_operation_seconds",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set current local tier entry count
pub fn set_local_entries(count: usize) {
    gauge!("catalog_cache_local_entries").set(count as f64);
}

/// Record a capacity eviction from the local tier
pub fn record_local_eviction() {
    counter!("catalog_cache_local_evictions_total").increment(1);
}

/// Record a compressed payload (original vs stored size)
pub fn record_compression(original_bytes: usize, compressed_bytes: usize) {
    counter!("catalog_cache_compressed_payloads_total").increment(1);
    if compressed_bytes > 0 {
        histogram!("catalog_cache_compression_ratio")
            .record(original_bytes as f64 / compressed_bytes as f64);
    }
}

/// Record a payload that failed to decode
pub fn record_codec_error(tier: &str) {
    counter!(
        "catalog_cache_codec_errors_total",
        "tier" => tier.to_string()
    )
    .increment(1);
}

/// Record a remote tier error with its operation
pub fn record_remote_error(operation: &str, error_type: &str) {
    counter!(
        "catalog_cache_remote_errors_total",
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Set remote connectivity (1 = connected, 0 = not)
pub fn set_remote_connected(connected: bool) {
    gauge!("catalog_cache_remote_connected").set(if connected { 1.0 } else { 0.0 });
}

// ═══════════════════════════════════════════════════════════════════════════
// CIRCUIT BREAKER - Resilience metrics
// ═══════════════════════════════════════════════════════════════════════════

/// Set circuit breaker state (0 = closed, 1 = open)
pub fn set_circuit_state(circuit: &str, state: CircuitState) {
    gauge!(
        "catalog_cache_circuit_breaker_state",
        "circuit" => circuit.to_string()
    )
    .set(state as u8 as f64);
}

/// Record a state transition
pub fn record_circuit_transition(circuit: &str, to: CircuitState) {
    counter!(
        "catalog_cache_circuit_breaker_transitions_total",
        "circuit" => circuit.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// Record circuit breaker call outcome
pub fn record_circuit_breaker_call(circuit: &str, outcome: &str) {
    counter!(
        "catalog_cache_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a recovery probe outcome
pub fn record_circuit_probe(circuit: &str, success: bool) {
    counter!(
        "catalog_cache_circuit_breaker_probes_total",
        "circuit" => circuit.to_string(),
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// INVALIDATION
// ═══════════════════════════════════════════════════════════════════════════

/// Record keys removed by a tag invalidation
pub fn record_tag_invalidation(tags: usize, keys_removed: usize, failures: usize) {
    counter!("catalog_cache_tag_invalidations_total").increment(tags as u64);
    histogram!("catalog_cache_tag_invalidation_keys").record(keys_removed as f64);
    if failures > 0 {
        counter!("catalog_cache_tag_invalidation_failures_total").increment(failures as u64);
    }
}

/// Record keys removed by a pattern deletion
pub fn record_pattern_deletion(keys_removed: usize, batches: usize) {
    histogram!("catalog_cache_pattern_deletion_keys").record(keys_removed as f64);
    histogram!("catalog_cache_pattern_deletion_batches").record(batches as f64);
}

/// Timer that records latency on drop
pub struct LatencyTimer {
    tier: &'static str,
    operation: &'static str,
    start: std::time::Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn new(tier: &'static str, operation: &'static str) -> Self {
        Self {
            tier,
            operation,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.tier, self.operation, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without an installed recorder these are no-ops; they must never panic.
    #[test]
    fn test_metrics_without_recorder_are_noops() {
        record_operation("local", "get", "hit");
        record_latency("remote", "get", Duration::from_millis(3));
        set_local_entries(10);
        record_local_eviction();
        record_compression(4096, 512);
        record_compression(10, 0);
        record_codec_error("remote");
        record_remote_error("get", "timeout");
        set_remote_connected(false);
        set_circuit_state("remote", CircuitState::Open);
        record_circuit_transition("remote", CircuitState::Closed);
        record_circuit_breaker_call("remote", "rejected");
        record_circuit_probe("remote", true);
        record_tag_invalidation(2, 5, 1);
        record_pattern_deletion(100, 1);
    }

    #[test]
    fn test_latency_timer_records_on_drop() {
        let timer = LatencyTimer::new("all", "get");
        std::thread::sleep(Duration::from_millis(1));
        drop(timer);
    }
}
