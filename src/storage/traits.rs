use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Failure talking to the remote tier. Counted by the circuit breaker,
/// never surfaced to cache callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote tier connection error: {0}")]
    Connection(String),
    #[error("remote tier {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("remote tier backend error: {0}")]
    Backend(String),
}

impl RemoteError {
    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Timeout { .. } => "timeout",
            Self::Backend(_) => "backend",
        }
    }
}

/// One page of a cursor-based key scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor to pass to the next call; 0 once iteration is complete
    pub cursor: u64,
    /// Matching keys in this page (may be empty even when `cursor != 0`)
    pub keys: Vec<String>,
}

/// Client for the shared, networked key/value tier.
///
/// Every call may fail; implementations surface the error and never retry.
/// The tag index primitives update both directions (`tag → keys` and
/// `key → tags`) atomically with respect to each other.
#[async_trait]
pub trait RemoteTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError>;
    async fn set_with_ttl(&self, key: &str, payload: &[u8], ttl_secs: u64) -> Result<(), RemoteError>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, RemoteError>;

    /// Delete several keys in one round-trip. Returns how many existed.
    /// Default implementation falls back to sequential deletes.
    async fn delete_many(&self, keys: &[String]) -> Result<u64, RemoteError> {
        let mut removed = 0;
        for key in keys {
            if self.delete(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Fetch one page of keys matching a glob pattern, starting at `cursor`
    /// (0 to begin). `count` is a per-page work hint, not an exact size.
    /// Tag index bookkeeping keys are never returned.
    async fn scan_page(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage, RemoteError>;

    /// Link `key` under `tag` in both directions. The link lives at least
    /// `ttl_secs`, so sets for values that expire unseen go away too.
    async fn add_key_to_tag(&self, tag: &str, key: &str, ttl_secs: u64) -> Result<(), RemoteError>;
    async fn remove_key_from_tag(&self, tag: &str, key: &str) -> Result<(), RemoteError>;
    async fn members_of_tag(&self, tag: &str) -> Result<HashSet<String>, RemoteError>;
    async fn tags_of_key(&self, key: &str) -> Result<HashSet<String>, RemoteError>;

    /// Lightweight connectivity check, used by recovery probes.
    async fn ping(&self) -> Result<(), RemoteError>;

    /// Remove every key this tier owns.
    async fn flush(&self) -> Result<(), RemoteError>;
}

impl<'r> dyn RemoteTier + 'r {
    /// Lazily enumerate keys matching `pattern`, `batch_size` at a time.
    pub fn scan_keys_matching(&self, pattern: &str, batch_size: usize) -> KeyScan<'_> {
        KeyScan::new(self, pattern, batch_size)
    }
}

/// A lazy, finite, restartable key enumeration over [`RemoteTier::scan_page`].
///
/// Only one page is held in memory at a time. Save [`cursor`](Self::cursor)
/// to resume an interrupted scan with [`KeyScan::resume`]. Keys may be
/// yielded more than once if the keyspace changes during iteration.
pub struct KeyScan<'a> {
    remote: &'a dyn RemoteTier,
    pattern: String,
    batch_size: usize,
    cursor: u64,
    finished: bool,
}

impl<'a> KeyScan<'a> {
    pub fn new(remote: &'a dyn RemoteTier, pattern: &str, batch_size: usize) -> Self {
        Self::resume(remote, pattern, batch_size, 0)
    }

    /// Continue a scan from a previously saved cursor.
    pub fn resume(remote: &'a dyn RemoteTier, pattern: &str, batch_size: usize, cursor: u64) -> Self {
        Self {
            remote,
            pattern: pattern.to_string(),
            batch_size: batch_size.max(1),
            cursor,
            finished: false,
        }
    }

    /// Next page of keys, or `None` when the scan is complete.
    ///
    /// Pages with no matches are skipped, so a returned batch is never empty.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<String>>, RemoteError> {
        while !self.finished {
            let page = self
                .remote
                .scan_page(self.cursor, &self.pattern, self.batch_size)
                .await?;
            self.cursor = page.cursor;
            self.finished = page.cursor == 0;
            if !page.keys.is_empty() {
                return Ok(Some(page.keys));
            }
        }
        Ok(None)
    }

    /// Cursor for resuming; 0 before the first page and after the last.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
