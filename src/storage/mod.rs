// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote tier backends.
//!
//! - [`traits`]: the [`RemoteTier`](traits::RemoteTier) contract and cursor scans
//! - [`redis`]: production backend over a Redis connection manager
//! - [`memory`]: in-process backend with the same semantics

pub mod memory;
pub mod redis;
pub mod traits;
