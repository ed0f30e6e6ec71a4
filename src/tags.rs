// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tag index over the remote tier.
//!
//! Tags group cache keys for bulk invalidation. The index is kept in both
//! directions (`tag → keys`, `key → tags`) so that a direct key delete can
//! find and unlink its tags without scanning.
//!
//! All updates go through the targeted add/remove primitives of
//! [`RemoteTier`]. Sets are never read, modified and written back whole, so
//! concurrent writers on other instances cannot lose each other's updates.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::storage::traits::{RemoteError, RemoteTier};

/// Outcome of a tag invalidation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagInvalidation {
    /// Every member key resolved from the tags, deduplicated
    pub keys: Vec<String>,
    /// Keys whose remote value was deleted and unlinked from the index
    pub removed: usize,
    /// Keys where the remote delete or unlink failed
    pub failed: usize,
    /// Last error seen, if any step failed
    pub last_error: Option<RemoteError>,
}

impl TagInvalidation {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

pub struct TagIndex {
    remote: Arc<dyn RemoteTier>,
}

impl TagIndex {
    pub fn new(remote: Arc<dyn RemoteTier>) -> Self {
        Self { remote }
    }

    /// Link `key` to every tag, in both directions. Links outlive the value
    /// by at most its own `ttl_secs`.
    pub async fn associate(&self, key: &str, tags: &[&str], ttl_secs: u64) -> Result<(), RemoteError> {
        for tag in tags {
            self.remote.add_key_to_tag(tag, key, ttl_secs).await?;
        }
        if !tags.is_empty() {
            debug!(key = %key, tags = tags.len(), "Associated key with tags");
        }
        Ok(())
    }

    /// Unlink `key` from every tag it belongs to.
    ///
    /// The key's own tag set empties as a side effect of the per-tag removes.
    pub async fn dissociate(&self, key: &str) -> Result<(), RemoteError> {
        let tags = self.remote.tags_of_key(key).await?;
        for tag in &tags {
            self.remote.remove_key_from_tag(tag, key).await?;
        }
        Ok(())
    }

    pub async fn members_of_tag(&self, tag: &str) -> Result<HashSet<String>, RemoteError> {
        self.remote.members_of_tag(tag).await
    }

    /// Delete every key stored under any of `tags` and unlink it.
    ///
    /// A failing key does not stop the rest of the batch; failures are
    /// counted in the result. A key whose value delete failed stays indexed
    /// so a later invalidation can retry it. Fails outright only if a tag's
    /// member set cannot be read.
    pub async fn invalidate_tags(&self, tags: &[&str]) -> Result<TagInvalidation, RemoteError> {
        let mut outcome = TagInvalidation::default();
        let mut seen: HashSet<String> = HashSet::new();

        for tag in tags {
            let members = self.remote.members_of_tag(tag).await?;
            debug!(tag = %tag, members = members.len(), "Invalidating tag");

            for key in members {
                if !seen.insert(key.clone()) {
                    continue;
                }
                match self.remove_member(&key).await {
                    Ok(()) => outcome.removed += 1,
                    Err(e) => {
                        warn!(tag = %tag, key = %key, error = %e, "Failed to invalidate tagged key");
                        outcome.failed += 1;
                        outcome.last_error = Some(e);
                    }
                }
                outcome.keys.push(key);
            }
        }

        crate::metrics::record_tag_invalidation(tags.len(), outcome.removed, outcome.failed);
        Ok(outcome)
    }

    async fn remove_member(&self, key: &str) -> Result<(), RemoteError> {
        self.remote.delete(key).await?;
        self.dissociate(key).await
    }
}
