//! Bulk invalidation: by tag, by key pattern, and full clear.

use tracing::{debug, info, warn};

use crate::metrics::LatencyTimer;

use super::types::Counters;
use super::{CacheError, CacheOrchestrator};

impl CacheOrchestrator {
    /// Delete every key stored under any of `tags` from both tiers.
    ///
    /// Returns the number of keys removed from the remote tier. Keys that
    /// fail to delete do not stop the batch. An empty tag list is a no-op.
    /// Tags live on the remote tier, so nothing can be resolved while the
    /// breaker is open or in local-only mode and this returns 0.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use catalog_cache::{CacheOrchestrator, keys};
    /// # async fn example(cache: &CacheOrchestrator) {
    /// // After updating product 42 in the "shoes" category
    /// let product = keys::entity_tag("products", 42);
    /// let lists = keys::list_tag("products");
    /// let removed = cache
    ///     .invalidate_by_tags(&[product.as_str(), lists.as_str(), "category:shoes"])
    ///     .await;
    /// # }
    /// ```
    #[tracing::instrument(skip(self))]
    pub async fn invalidate_by_tags(&self, tags: &[&str]) -> usize {
        if tags.is_empty() {
            return 0;
        }
        let _timer = LatencyTimer::new("all", "invalidate_tags");

        let remote = match self.remote_for("invalidate_tags") {
            Ok(remote) => remote,
            Err(e) => {
                warn!(reason = %e, tags = tags.len(), "Tag invalidation skipped, members cannot be resolved");
                return 0;
            }
        };

        let outcome = match remote.tags.invalidate_tags(tags).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.on_remote_failure("invalidate_tags", &e);
                crate::metrics::record_operation("remote", "invalidate_tags", "error");
                return 0;
            }
        };

        for key in &outcome.keys {
            self.local.delete(key);
        }
        match outcome.last_error {
            Some(ref e) => self.on_remote_failure("invalidate_tags", e),
            None => self.on_remote_success(),
        }

        Counters::add(&self.counters.tag_invalidations, tags.len() as u64);
        Counters::add(&self.counters.keys_invalidated, outcome.removed as u64);
        let status = if outcome.is_complete() { "success" } else { "error" };
        crate::metrics::record_operation("remote", "invalidate_tags", status);
        info!(
            tags = tags.len(),
            removed = outcome.removed,
            failed = outcome.failed,
            "Invalidated tags"
        );
        outcome.removed
    }

    /// Delete every key matching a glob pattern from both tiers.
    ///
    /// Matching local keys are evicted first, even when the remote tier is
    /// skipped. Remote keys are enumerated with a cursor and deleted in
    /// batches of `scan_batch_size`, yielding to the runtime between
    /// batches. Stops early if the remote tier fails or the breaker opens.
    ///
    /// Returns the number of remote keys deleted, or the number of local
    /// keys evicted when the remote tier was not consulted.
    #[tracing::instrument(skip(self))]
    pub async fn delete_by_pattern(&self, pattern: &str) -> usize {
        let _timer = LatencyTimer::new("all", "delete_pattern");
        Counters::bump(&self.counters.pattern_deletions);

        let local_removed = self.local.delete_matching(pattern).len();
        debug!(evicted = local_removed, "Evicted matching local keys");

        let remote = match self.remote_for("delete_pattern") {
            Ok(remote) => remote,
            Err(e) => {
                debug!(reason = %e, "Remote pattern deletion skipped");
                return local_removed;
            }
        };

        let mut scan = remote
            .tier
            .scan_keys_matching(pattern, self.config.scan_batch_size);
        let mut removed: u64 = 0;
        let mut batches: usize = 0;

        loop {
            let batch = match self.observe("scan", scan.next_batch().await) {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(_) => break,
            };
            batches += 1;

            match self.observe("delete_many", remote.tier.delete_many(&batch).await) {
                Ok(n) => removed += n,
                Err(_) => break,
            }
            let mut unlinked = true;
            for key in &batch {
                self.local.delete(key);
                if self.observe("dissociate", remote.tags.dissociate(key).await).is_err() {
                    unlinked = false;
                    break;
                }
            }
            if !unlinked {
                break;
            }

            if !self.breaker.is_closed() {
                warn!(cursor = scan.cursor(), removed, "Breaker opened during pattern deletion, stopping");
                break;
            }
            tokio::task::yield_now().await;
        }

        let removed = removed as usize;
        crate::metrics::record_pattern_deletion(removed, batches);
        let status = if scan.is_finished() { "success" } else { "error" };
        crate::metrics::record_operation("remote", "delete_pattern", status);
        info!(removed, batches, complete = scan.is_finished(), "Deleted keys by pattern");
        removed
    }

    /// Empty the local tier and flush the remote keyspace.
    ///
    /// Administrative and destructive: with an empty `key_prefix` this
    /// flushes the whole Redis database.
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self) {
        self.local.clear();
        crate::metrics::record_operation("local", "clear", "success");

        match self.remote_for("clear") {
            Ok(remote) => match self.observe("clear", remote.tier.flush().await) {
                Ok(()) => {
                    crate::metrics::record_operation("remote", "clear", "success");
                    info!("Cleared local and remote tiers");
                }
                Err(_) => crate::metrics::record_operation("remote", "clear", "error"),
            },
            Err(CacheError::LocalOnly) => info!("Cleared local tier"),
            Err(e) => warn!(reason = %e, "Cleared local tier only, remote flush skipped"),
        }
    }
}
