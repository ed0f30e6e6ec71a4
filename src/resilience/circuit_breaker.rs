// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Two-state circuit breaker for the remote tier.
//!
//! Protects request paths from a failing Redis. Every remote call outcome is
//! reported here; after `failure_threshold` consecutive failures the breaker
//! opens and the orchestrator stops calling the remote tier entirely.
//!
//! States:
//! - Closed: Normal operation, remote calls pass through
//! - Open: Remote tier skipped; local-only degraded mode
//!
//! There is no half-open state. While open, a single recovery probe is
//! scheduled every `recovery_timeout`; the breaker stays open to all other
//! callers until that probe succeeds.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Circuit breaker state for metrics/monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Number of consecutive failures to trip the circuit
    pub failure_threshold: u32,
    /// Delay between recovery probes while open
    pub recovery_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitConfig {
    /// Fast recovery for testing
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            failure_threshold: 2,
            recovery_timeout: Duration::from_millis(50),
        }
    }
}

/// Read-only view of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// When the breaker last opened; `None` while closed.
    pub opened_at: Option<Instant>,
}

#[derive(Debug)]
struct BreakerState {
    status: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// A named two-state circuit breaker with metrics tracking
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    state: Mutex<BreakerState>,
    /// Set while a recovery probe is scheduled or running
    probe_scheduled: AtomicBool,
    trips: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and config
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                status: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            probe_scheduled: AtomicBool::new(false),
            trips: AtomicU64::new(0),
        }
    }

    /// Get the circuit breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Get current circuit state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state.lock().status
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.state.lock();
        CircuitSnapshot {
            state: state.status,
            consecutive_failures: state.consecutive_failures,
            opened_at: state.opened_at,
        }
    }

    /// Whether a call may go to the remote tier right now.
    ///
    /// Records a rejection when it may not.
    pub fn allow(&self) -> bool {
        if self.is_closed() {
            true
        } else {
            crate::metrics::record_circuit_breaker_call(&self.name, "rejected");
            false
        }
    }

    /// Report a successful remote call.
    pub fn record_success(&self) {
        crate::metrics::record_circuit_breaker_call(&self.name, "success");

        let mut state = self.state.lock();
        // A late success from a call issued before the trip does not close
        // the breaker; only the probe does that.
        if state.status == CircuitState::Closed {
            state.consecutive_failures = 0;
        }
    }

    /// Report a failed remote call.
    ///
    /// Returns `true` if this failure tripped the breaker, in which case the
    /// caller is responsible for scheduling the recovery probe.
    pub fn record_failure(&self) -> bool {
        crate::metrics::record_circuit_breaker_call(&self.name, "failure");

        let mut state = self.state.lock();
        if state.status == CircuitState::Open {
            return false;
        }
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        debug!(
            circuit = %self.name,
            consecutive_failures = state.consecutive_failures,
            "Circuit call failed"
        );

        if state.consecutive_failures >= self.config.failure_threshold {
            state.status = CircuitState::Open;
            state.opened_at = Some(Instant::now());
            self.trips.fetch_add(1, Ordering::Relaxed);
            warn!(
                circuit = %self.name,
                consecutive_failures = state.consecutive_failures,
                cooldown = ?self.config.recovery_timeout,
                "Circuit breaker opened"
            );
            crate::metrics::set_circuit_state(&self.name, CircuitState::Open);
            crate::metrics::record_circuit_transition(&self.name, CircuitState::Open);
            return true;
        }
        false
    }

    /// Claim the single probe slot. Returns false if a probe is already pending.
    pub fn try_schedule_probe(&self) -> bool {
        self.probe_scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the probe slot without closing (e.g. the probe task was dropped).
    pub fn release_probe(&self) {
        self.probe_scheduled.store(false, Ordering::Release);
    }

    /// Apply the outcome of a recovery probe.
    ///
    /// Success closes the breaker, resets the failure count and frees the
    /// probe slot. Failure keeps it open; the caller re-schedules.
    pub fn record_probe(&self, success: bool) {
        crate::metrics::record_circuit_probe(&self.name, success);
        if !success {
            debug!(circuit = %self.name, "Recovery probe failed, staying open");
            return;
        }

        {
            let mut state = self.state.lock();
            state.status = CircuitState::Closed;
            state.consecutive_failures = 0;
            state.opened_at = None;
        }
        self.probe_scheduled.store(false, Ordering::Release);
        info!(circuit = %self.name, "Circuit breaker closed after successful probe");
        crate::metrics::set_circuit_state(&self.name, CircuitState::Closed);
        crate::metrics::record_circuit_transition(&self.name, CircuitState::Closed);
    }

    /// Get number of Closed → Open transitions
    #[must_use]
    pub fn trips(&self) -> u64 {
        self.trips.load(Ordering::Relaxed)
    }
}
