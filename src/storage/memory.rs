//! In-process stand-in for the remote tier.
//!
//! Behaves like the Redis tier (server-side TTL, glob scans with a cursor,
//! symmetric tag sets) without a network. Useful for tests and for running
//! a single instance without Redis while keeping the full code path.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::traits::{RemoteError, RemoteTier, ScanPage};
use crate::local::deadline_after;
use crate::pattern::glob_match;

#[derive(Debug, Clone)]
struct StoredValue {
    payload: Vec<u8>,
    expires_at: Instant,
    /// Write sequence; scan cursors point into this order
    seq: u64,
}

/// Both directions of the index. Each link expires with the value it was
/// created for, and an expired link is dropped from both sides at once.
#[derive(Debug, Default)]
struct TagSets {
    tag_to_keys: HashMap<String, HashMap<String, Instant>>,
    key_to_tags: HashMap<String, HashMap<String, Instant>>,
}

impl TagSets {
    fn link(&mut self, tag: &str, key: &str, expires_at: Instant) {
        self.tag_to_keys
            .entry(tag.to_string())
            .or_default()
            .insert(key.to_string(), expires_at);
        self.key_to_tags
            .entry(key.to_string())
            .or_default()
            .insert(tag.to_string(), expires_at);
    }

    fn unlink(&mut self, tag: &str, key: &str) {
        // Empty sets are dropped, matching Redis
        if let Some(members) = self.tag_to_keys.get_mut(tag) {
            members.remove(key);
            if members.is_empty() {
                self.tag_to_keys.remove(tag);
            }
        }
        if let Some(tags) = self.key_to_tags.get_mut(key) {
            tags.remove(tag);
            if tags.is_empty() {
                self.key_to_tags.remove(key);
            }
        }
    }

    fn members(&mut self, tag: &str, now: Instant) -> HashSet<String> {
        let Some(members) = self.tag_to_keys.get(tag) else {
            return HashSet::new();
        };
        let (live, expired): (Vec<_>, Vec<_>) = members.iter().partition(|entry| *entry.1 >= now);
        let live: HashSet<String> = live.into_iter().map(|(k, _)| k.clone()).collect();
        let expired: Vec<String> = expired.into_iter().map(|(k, _)| k.clone()).collect();
        for key in &expired {
            self.unlink(tag, key);
        }
        live
    }

    fn tags(&mut self, key: &str, now: Instant) -> HashSet<String> {
        let Some(tags) = self.key_to_tags.get(key) else {
            return HashSet::new();
        };
        let (live, expired): (Vec<_>, Vec<_>) = tags.iter().partition(|entry| *entry.1 >= now);
        let live: HashSet<String> = live.into_iter().map(|(t, _)| t.clone()).collect();
        let expired: Vec<String> = expired.into_iter().map(|(t, _)| t.clone()).collect();
        for tag in &expired {
            self.unlink(tag, key);
        }
        live
    }
}

pub struct InMemoryRemote {
    data: DashMap<String, StoredValue>,
    /// Keys by write sequence. May briefly hold superseded sequences, which
    /// scans drop when they meet them.
    order: Mutex<BTreeMap<u64, String>>,
    next_seq: AtomicU64,
    // One lock for both directions keeps them symmetric
    tags: Mutex<TagSets>,
}

impl InMemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            order: Mutex::new(BTreeMap::new()),
            next_seq: AtomicU64::new(1),
            tags: Mutex::new(TagSets::default()),
        }
    }

    /// Get current (unexpired) item count
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.data.iter().filter(|e| e.value().expires_at >= now).count()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a live value is stored under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.data
            .get(key)
            .is_some_and(|v| v.expires_at >= Instant::now())
    }

    /// Remaining TTL of a stored key.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.data
            .get(key)
            .and_then(|v| v.expires_at.checked_duration_since(Instant::now()))
    }

    /// Stored values, expired ones not yet purged included.
    #[must_use]
    pub fn stored(&self) -> usize {
        self.data.len()
    }

    fn forget(&self, removed: Option<(String, StoredValue)>) -> bool {
        match removed {
            Some((_, value)) => {
                self.order.lock().remove(&value.seq);
                true
            }
            None => false,
        }
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteTier for InMemoryRemote {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let now = Instant::now();
        let expired = match self.data.get(key) {
            Some(v) if v.expires_at >= now => return Ok(Some(v.payload.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.forget(self.data.remove_if(key, |_, v| v.expires_at < now));
        }
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, payload: &[u8], ttl_secs: u64) -> Result<(), RemoteError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let previous = self.data.insert(
            key.to_string(),
            StoredValue {
                payload: payload.to_vec(),
                expires_at: deadline_after(Duration::from_secs(ttl_secs)),
                seq,
            },
        );
        let mut order = self.order.lock();
        if let Some(previous) = previous {
            order.remove(&previous.seq);
        }
        order.insert(seq, key.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, RemoteError> {
        Ok(self.forget(self.data.remove(key)))
    }

    /// The cursor is the write sequence to resume from, so deleting keys
    /// mid-scan never skips the ones that remain. A key rewritten mid-scan
    /// may be returned twice, as with Redis. Like Redis, `count` bounds the
    /// entries examined per page, not the matches returned. Expired values
    /// met along the way are purged.
    async fn scan_page(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage, RemoteError> {
        let now = Instant::now();
        let count = count.max(1);
        let mut order = self.order.lock();

        let mut keys = Vec::new();
        let mut dropped = Vec::new();
        let mut next = 0;
        for (examined, (&seq, key)) in order.range(cursor..).enumerate() {
            if examined == count {
                next = seq;
                break;
            }
            let live = match self.data.get(key) {
                Some(v) if v.seq == seq => v.expires_at >= now,
                // Superseded by a newer write, or already deleted
                _ => {
                    dropped.push(seq);
                    continue;
                }
            };
            if !live {
                dropped.push(seq);
                self.data.remove_if(key, |_, v| v.seq == seq && v.expires_at < now);
            } else if glob_match(pattern, key) {
                keys.push(key.clone());
            }
        }
        for seq in dropped {
            order.remove(&seq);
        }

        Ok(ScanPage { cursor: next, keys })
    }

    async fn add_key_to_tag(&self, tag: &str, key: &str, ttl_secs: u64) -> Result<(), RemoteError> {
        let expires_at = deadline_after(Duration::from_secs(ttl_secs));
        self.tags.lock().link(tag, key, expires_at);
        Ok(())
    }

    async fn remove_key_from_tag(&self, tag: &str, key: &str) -> Result<(), RemoteError> {
        self.tags.lock().unlink(tag, key);
        Ok(())
    }

    async fn members_of_tag(&self, tag: &str) -> Result<HashSet<String>, RemoteError> {
        Ok(self.tags.lock().members(tag, Instant::now()))
    }

    async fn tags_of_key(&self, key: &str) -> Result<HashSet<String>, RemoteError> {
        Ok(self.tags.lock().tags(key, Instant::now()))
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn flush(&self) -> Result<(), RemoteError> {
        let mut order = self.order.lock();
        self.data.clear();
        order.clear();
        let mut sets = self.tags.lock();
        sets.tag_to_keys.clear();
        sets.key_to_tags.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = InMemoryRemote::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = InMemoryRemote::new();
        store.set_with_ttl("products:1", b"\x00{}", 60).await.unwrap();

        assert_eq!(store.get("products:1").await.unwrap(), Some(b"\x00{}".to_vec()));
        assert_eq!(store.get("products:2").await.unwrap(), None);
        assert!(store.ttl("products:1").unwrap() <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_expired_value_is_absent() {
        let store = InMemoryRemote::new();
        store.set_with_ttl("gone", b"x", 0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(store.get("gone").await.unwrap(), None);
        assert!(!store.contains("gone"));
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let store = InMemoryRemote::new();
        store.set_with_ttl("k", b"x", 60).await.unwrap();

        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_many_default_impl() {
        let store = InMemoryRemote::new();
        store.set_with_ttl("a", b"x", 60).await.unwrap();
        store.set_with_ttl("b", b"x", 60).await.unwrap();

        let removed = store
            .delete_many(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_scan_pages_until_cursor_zero() {
        let store = InMemoryRemote::new();
        for i in 0..25 {
            store.set_with_ttl(&format!("products:{i}"), b"x", 60).await.unwrap();
        }
        store.set_with_ttl("users:1", b"x", 60).await.unwrap();

        let mut cursor = 0;
        let mut found = Vec::new();
        let mut pages = 0;
        loop {
            let page = store.scan_page(cursor, "products:*", 10).await.unwrap();
            found.extend(page.keys);
            pages += 1;
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }

        assert_eq!(found.len(), 25);
        assert_eq!(pages, 3);
        assert!(found.iter().all(|k| k.starts_with("products:")));
    }

    #[tokio::test]
    async fn test_deleting_during_scan_skips_nothing() {
        let store = InMemoryRemote::new();
        for i in 0..20 {
            store.set_with_ttl(&format!("k:{i}"), b"x", 60).await.unwrap();
        }

        let remote: &dyn RemoteTier = &store;
        let mut scan = remote.scan_keys_matching("k:*", 6);
        let mut seen = 0;
        while let Some(batch) = scan.next_batch().await.unwrap() {
            seen += batch.len();
            store.delete_many(&batch).await.unwrap();
        }

        assert_eq!(seen, 20);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_key_scan_skips_empty_pages() {
        let store = InMemoryRemote::new();
        for i in 0..10 {
            store.set_with_ttl(&format!("a:{i}"), b"x", 60).await.unwrap();
        }
        store.set_with_ttl("z:1", b"x", 60).await.unwrap();

        let remote: &dyn RemoteTier = &store;
        let mut scan = remote.scan_keys_matching("z:*", 3);
        let batch = scan.next_batch().await.unwrap();

        assert_eq!(batch, Some(vec!["z:1".to_string()]));
        assert_eq!(scan.next_batch().await.unwrap(), None);
        assert!(scan.is_finished());
    }

    #[tokio::test]
    async fn test_tag_sets_are_symmetric() {
        let store = InMemoryRemote::new();
        store.add_key_to_tag("category:shoes", "products:1", 60).await.unwrap();
        store.add_key_to_tag("category:shoes", "products:2", 60).await.unwrap();
        store.add_key_to_tag("product:1", "products:1", 60).await.unwrap();

        let members = store.members_of_tag("category:shoes").await.unwrap();
        assert_eq!(members.len(), 2);
        let tags = store.tags_of_key("products:1").await.unwrap();
        assert!(tags.contains("category:shoes") && tags.contains("product:1"));

        store.remove_key_from_tag("category:shoes", "products:1").await.unwrap();
        assert!(!store.members_of_tag("category:shoes").await.unwrap().contains("products:1"));
        assert!(!store.tags_of_key("products:1").await.unwrap().contains("category:shoes"));
    }

    #[tokio::test]
    async fn test_flush_clears_values_and_tags() {
        let store = InMemoryRemote::new();
        store.set_with_ttl("k", b"x", 60).await.unwrap();
        store.add_key_to_tag("t", "k", 60).await.unwrap();

        store.flush().await.unwrap();

        assert!(store.is_empty());
        assert!(store.members_of_tag("t").await.unwrap().is_empty());
        assert!(store.tags_of_key("k").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tag_links_expire_with_their_value() {
        let store = InMemoryRemote::new();
        store.set_with_ttl("products:1", b"x", 1).await.unwrap();
        store.add_key_to_tag("t", "products:1", 1).await.unwrap();
        store.set_with_ttl("products:2", b"x", 60).await.unwrap();
        store.add_key_to_tag("t", "products:2", 60).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(!store.contains("products:1"));
        let members = store.members_of_tag("t").await.unwrap();
        assert_eq!(members, HashSet::from(["products:2".to_string()]));
        assert!(store.tags_of_key("products:1").await.unwrap().is_empty());
        // Both directions were pruned together
        assert!(!store.tags.lock().key_to_tags.contains_key("products:1"));
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_overflow() {
        let store = InMemoryRemote::new();
        store.set_with_ttl("k", b"x", u64::MAX).await.unwrap();
        store.add_key_to_tag("t", "k", u64::MAX).await.unwrap();

        assert!(store.contains("k"));
        assert!(store.members_of_tag("t").await.unwrap().contains("k"));
    }

    #[tokio::test]
    async fn test_scan_purges_expired_values() {
        let store = InMemoryRemote::new();
        for i in 0..5 {
            store.set_with_ttl(&format!("old:{i}"), b"x", 0).await.unwrap();
        }
        store.set_with_ttl("new:1", b"x", 60).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.stored(), 6);

        let page = store.scan_page(0, "*", 100).await.unwrap();

        assert_eq!(page.keys, vec!["new:1".to_string()]);
        assert_eq!(page.cursor, 0);
        assert_eq!(store.stored(), 1);
    }

    #[tokio::test]
    async fn test_rewrite_moves_key_to_end_of_scan() {
        let store = InMemoryRemote::new();
        store.set_with_ttl("a", b"x", 60).await.unwrap();
        store.set_with_ttl("b", b"x", 60).await.unwrap();
        store.set_with_ttl("a", b"y", 60).await.unwrap();

        let first = store.scan_page(0, "*", 1).await.unwrap();
        assert_eq!(first.keys, vec!["b".to_string()]);
        let second = store.scan_page(first.cursor, "*", 1).await.unwrap();
        assert_eq!(second.keys, vec!["a".to_string()]);
        assert_eq!(second.cursor, 0);
        assert_eq!(store.order.lock().len(), 2);
    }
}
