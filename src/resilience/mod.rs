//! Failure isolation for the remote tier.
//!
//! - [`circuit_breaker`]: two-state breaker with scheduled recovery probes
//! - [`retry`]: backoff for the initial Redis connection

pub mod circuit_breaker;
pub mod retry;
