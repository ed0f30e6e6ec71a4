// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process tier: a bounded LRU map with per-entry expiry.
//!
//! Never performs I/O and never fails. Expiry is lazy (an expired entry is
//! dropped when it is next read); [`LocalTier::purge_expired`] exists for the
//! optional background sweep.
//!
//! Every mutation advances a generation counter and stamps the key it
//! touched. A remote read notes the generation before it starts and hands
//! it to [`LocalTier::fill`]; the fill is dropped if that key was written or
//! deleted in between, so a slow response never overwrites a newer local
//! write. Writes to other keys do not block the fill. Bulk mutations
//! (`clear`, pattern deletes) act as a barrier for every in-flight fill.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::codec;
use crate::config::MAX_TTL_SECS;
use crate::pattern::glob_match;

/// Lower bound on the number of per-key write stamps kept for `fill`.
const MIN_TRACKED_WRITES: usize = 1024;

/// `now + ttl`, with `ttl` clamped to [`MAX_TTL_SECS`] so it cannot overflow.
pub(crate) fn deadline_after(ttl: Duration) -> Instant {
    let now = Instant::now();
    let ttl = ttl.min(Duration::from_secs(MAX_TTL_SECS));
    now.checked_add(ttl).unwrap_or(now)
}

/// A cached payload as held by either tier.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    /// Encoded payload (marker byte + body), shared cheaply between readers.
    pub payload: Arc<[u8]>,
    pub is_compressed: bool,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, payload: Vec<u8>, ttl: Duration) -> Self {
        let is_compressed = codec::is_compressed(&payload);
        Self {
            key: key.into(),
            payload: payload.into(),
            is_compressed,
            expires_at: deadline_after(ttl),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}

struct Inner {
    entries: LruCache<String, CacheEntry>,
    generation: u64,
    /// Generation of the last write or delete per key
    written_at: HashMap<String, u64>,
    /// Generation of the last bulk mutation; older fills are all stale
    barrier: u64,
    evictions: u64,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn stamp(&mut self, key: &str, limit: usize) {
        let generation = self.bump();
        if self.written_at.len() >= limit && !self.written_at.contains_key(key) {
            // Forget individual stamps; everything in flight is now stale
            self.written_at.clear();
            self.barrier = generation;
        }
        self.written_at.insert(key.to_string(), generation);
    }

    fn bulk(&mut self) {
        self.barrier = self.bump();
        self.written_at.clear();
    }

    fn is_stale(&self, key: &str, observed: u64) -> bool {
        self.barrier > observed || self.written_at.get(key).is_some_and(|&g| g > observed)
    }
}

/// Bounded, least-recently-used, in-process key/value store.
pub struct LocalTier {
    inner: Mutex<Inner>,
    capacity: NonZeroUsize,
    tracked_writes: usize,
}

impl LocalTier {
    /// Create a tier holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                generation: 0,
                written_at: HashMap::new(),
                barrier: 0,
                evictions: 0,
            }),
            capacity,
            tracked_writes: capacity.get().max(MIN_TRACKED_WRITES),
        }
    }

    /// Returns the entry if present and unexpired. A hit refreshes recency.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get(key) {
            Some(entry) if !entry.is_expired() => return Some(entry.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.entries.pop(key);
        }
        None
    }

    /// Insert or overwrite, evicting the least recently used entry when full.
    pub fn set(&self, key: &str, payload: Vec<u8>, ttl: Duration) {
        let entry = CacheEntry::new(key, payload, ttl);
        let mut inner = self.inner.lock();
        inner.stamp(key, self.tracked_writes);
        Self::insert_locked(&mut inner, entry);
    }

    /// Insert only if the key was not written or deleted since
    /// `observed_generation`.
    ///
    /// Returns whether the entry was stored.
    pub fn fill(&self, entry: CacheEntry, observed_generation: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.is_stale(&entry.key, observed_generation) {
            return false;
        }
        Self::insert_locked(&mut inner, entry);
        true
    }

    fn insert_locked(inner: &mut Inner, entry: CacheEntry) {
        let key = entry.key.clone();
        if let Some((evicted_key, _)) = inner.entries.push(key.clone(), entry) {
            // push returns the old value on overwrite as well as on eviction
            if evicted_key != key {
                inner.evictions += 1;
                crate::metrics::record_local_eviction();
            }
        }
        crate::metrics::set_local_entries(inner.entries.len());
    }

    /// Remove a key. Returns whether it was present (expired or not).
    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        inner.stamp(key, self.tracked_writes);
        let removed = inner.entries.pop(key).is_some();
        crate::metrics::set_local_entries(inner.entries.len());
        removed
    }

    /// Remove every key matching a glob pattern, returning the removed keys.
    pub fn delete_matching(&self, pattern: &str) -> Vec<String> {
        let mut inner = self.inner.lock();
        inner.bulk();
        let matched: Vec<String> = inner
            .entries
            .iter()
            .filter(|(k, _)| glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &matched {
            inner.entries.pop(key);
        }
        crate::metrics::set_local_entries(inner.entries.len());
        matched
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.bulk();
        inner.entries.clear();
        crate::metrics::set_local_entries(0);
    }

    /// Drop all expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.entries.pop(key);
        }
        crate::metrics::set_local_entries(inner.entries.len());
        expired.len()
    }

    /// Current mutation generation, to note before a remote read and pass
    /// to [`fill`](Self::fill).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Number of stored entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Entries evicted for capacity since creation.
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.inner.lock().evictions
    }
}
