//! Read and write path: `get`, `set`, `delete`.
//!
//! Reads go local first, then remote; a remote hit repopulates the local
//! tier. Writes always land locally and are mirrored to the remote tier
//! when the breaker allows it.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::CodecError;
use crate::local::CacheEntry;
use crate::metrics::LatencyTimer;

use super::types::Counters;
use super::{CacheError, CacheOrchestrator, Remote};

impl CacheOrchestrator {
    // ═══════════════════════════════════════════════════════════════════════════
    // API: Read path
    // ═══════════════════════════════════════════════════════════════════════════

    /// Get a value, checking the local tier then the remote tier.
    ///
    /// Returns `None` on a miss and on any failure: a remote error, an open
    /// breaker, or a payload that does not decode as `T`. A corrupt payload
    /// is dropped from the local tier.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use catalog_cache::CacheOrchestrator;
    /// # async fn example(cache: &CacheOrchestrator) {
    /// match cache.get::<serde_json::Value>("products:1").await {
    ///     Some(product) => println!("cached: {product}"),
    ///     None => println!("load from the database"),
    /// }
    /// # }
    /// ```
    #[tracing::instrument(skip(self), fields(tier))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let _timer = LatencyTimer::new("all", "get");

        match self.lookup(key).await {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                self.record_miss();
                None
            }
            Err(CacheError::Codec(e)) => {
                Counters::bump(&self.counters.codec_errors);
                crate::metrics::record_codec_error("all");
                warn!(error = %e, "Cached payload failed to decode, treating as miss");
                self.local.delete(key);
                self.record_miss();
                None
            }
            Err(e) => {
                debug!(reason = %e, "Remote tier unavailable, treating as miss");
                self.record_miss();
                None
            }
        }
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        if let Some(entry) = self.local.get(key) {
            let value = self.codec.decode(&entry.payload)?;
            tracing::Span::current().record("tier", "local");
            Counters::bump(&self.counters.local_hits);
            crate::metrics::record_operation("local", "get", "hit");
            debug!("Local hit");
            return Ok(Some(value));
        }
        crate::metrics::record_operation("local", "get", "miss");

        let remote = self.remote_for("get")?;
        // A local write to this key, or a bulk removal, after this point wins
        // over the remote response
        let observed = self.local.generation();
        let fetched = {
            let _timer = LatencyTimer::new("remote", "get");
            self.observe("get", remote.tier.get(key).await)
        };
        let payload = match fetched {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                crate::metrics::record_operation("remote", "get", "miss");
                return Ok(None);
            }
            Err(e) => {
                crate::metrics::record_operation("remote", "get", "error");
                return Err(e.into());
            }
        };

        let value = self.codec.decode(&payload)?;
        tracing::Span::current().record("tier", "remote");
        Counters::bump(&self.counters.remote_hits);
        crate::metrics::record_operation("remote", "get", "hit");

        // Remote GET carries no TTL; the local copy lives for the default TTL
        let entry = CacheEntry::new(key, payload, self.config.default_ttl());
        if !self.local.fill(entry, observed) {
            debug!("Local tier changed during remote read, not repopulating");
        }
        Ok(Some(value))
    }

    fn record_miss(&self) {
        Counters::bump(&self.counters.misses);
        crate::metrics::record_operation("all", "get", "miss");
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // API: Write path
    // ═══════════════════════════════════════════════════════════════════════════

    /// Store a value in both tiers and link it to `tags`.
    ///
    /// `ttl_secs == 0` uses the configured default TTL, and TTLs beyond
    /// [`MAX_TTL_SECS`](crate::config::MAX_TTL_SECS) are clamped to it. The
    /// local write always happens; the remote write and tag links are
    /// best-effort and their failures only feed the circuit breaker.
    ///
    /// # Errors
    ///
    /// A value that cannot be serialized is returned as a [`CodecError`] and
    /// nothing is stored. This is the one codec failure surfaced to callers:
    /// it is a bug in the value type, not a corrupt cache entry, so it is not
    /// turned into a silent no-op. It is still counted in `codec_errors`.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use catalog_cache::{CacheOrchestrator, keys};
    /// # use serde_json::json;
    /// # async fn example(cache: &CacheOrchestrator) -> Result<(), Box<dyn std::error::Error>> {
    /// let product = json!({"id": 42, "category": "shoes"});
    /// let tags = [keys::entity_tag("products", 42), "category:shoes".to_string()];
    /// let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
    ///
    /// cache.set(&keys::entity_key("products", 42), &product, 600, &tags).await?;
    /// # Ok(())
    /// # }
    /// ```
    #[tracing::instrument(skip(self, value), fields(tier))]
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
        tags: &[&str],
    ) -> Result<(), CodecError> {
        let _timer = LatencyTimer::new("all", "set");
        let ttl_secs = self.config.effective_ttl_secs(ttl_secs);

        let payload = match self.codec.encode(value) {
            Ok(payload) => payload,
            Err(e) => {
                Counters::bump(&self.counters.codec_errors);
                crate::metrics::record_codec_error("all");
                warn!(error = %e, "Value failed to serialize, not cached");
                return Err(e);
            }
        };
        self.local.set(key, payload.clone(), Duration::from_secs(ttl_secs));
        tracing::Span::current().record("tier", "local");
        Counters::bump(&self.counters.sets);
        crate::metrics::record_operation("local", "set", "success");

        let remote = match self.remote_for("set") {
            Ok(remote) => remote,
            Err(e) => {
                debug!(reason = %e, "Remote write skipped");
                return Ok(());
            }
        };
        tracing::Span::current().record("tier", "all");

        let _timer = LatencyTimer::new("remote", "set");
        match self.write_remote(remote, key, &payload, ttl_secs, tags).await {
            Ok(()) => crate::metrics::record_operation("remote", "set", "success"),
            Err(e) => {
                debug!(error = %e, "Remote write failed, value is local only");
                crate::metrics::record_operation("remote", "set", "error");
            }
        }
        Ok(())
    }

    async fn write_remote(
        &self,
        remote: &Remote,
        key: &str,
        payload: &[u8],
        ttl_secs: u64,
        tags: &[&str],
    ) -> Result<(), CacheError> {
        self.observe("set", remote.tier.set_with_ttl(key, payload, ttl_secs).await)?;
        if tags.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.observe("associate", remote.tags.associate(key, tags, ttl_secs).await) {
            // A value no tag can reach would outlive its invalidation
            let _ = self.observe("delete", remote.tier.delete(key).await);
            return Err(e.into());
        }
        Ok(())
    }

    /// Remove a key from both tiers and unlink it from its tags.
    ///
    /// Idempotent; deleting a missing key is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, key: &str) {
        let _timer = LatencyTimer::new("all", "delete");
        self.local.delete(key);
        Counters::bump(&self.counters.deletes);
        crate::metrics::record_operation("local", "delete", "success");

        let Ok(remote) = self.remote_for("delete") else {
            return;
        };
        let result = match self.observe("delete", remote.tier.delete(key).await) {
            Ok(_) => self.observe("dissociate", remote.tags.dissociate(key).await),
            Err(e) => Err(e),
        };

        let status = if result.is_ok() { "success" } else { "error" };
        crate::metrics::record_operation("remote", "delete", status);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde::Deserialize;

    use crate::config::CacheConfig;
    use crate::resilience::circuit_breaker::CircuitState;
    use crate::storage::memory::InMemoryRemote;
    use crate::storage::traits::RemoteTier;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Product {
        id: u64,
        name: String,
        tags: Vec<String>,
    }

    fn product(id: u64) -> Product {
        Product {
            id,
            name: format!("product-{id}"),
            tags: vec!["new".into()],
        }
    }

    fn cache_with_remote() -> (Arc<InMemoryRemote>, CacheOrchestrator) {
        let remote = Arc::new(InMemoryRemote::new());
        let config = CacheConfig {
            local_max_entries: 8,
            ..Default::default()
        };
        let cache = CacheOrchestrator::new(config, Some(remote.clone() as Arc<dyn RemoteTier>)).unwrap();
        (remote, cache)
    }

    #[tokio::test]
    async fn test_set_writes_both_tiers() {
        let (remote, cache) = cache_with_remote();
        cache.set("products:1", &product(1), 60, &["products:1"]).await.unwrap();

        assert!(cache.local.get("products:1").is_some());
        assert!(remote.contains("products:1"));
        assert!(remote.members_of_tag("products:1").await.unwrap().contains("products:1"));
        assert_eq!(cache.get::<Product>("products:1").await, Some(product(1)));
    }

    #[tokio::test]
    async fn test_zero_ttl_uses_default() {
        let (remote, cache) = cache_with_remote();
        cache.set("k", &1u32, 0, &[]).await.unwrap();

        let ttl = remote.ttl("k").unwrap();
        assert!(ttl > Duration::from_secs(290) && ttl <= Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_remote_hit_repopulates_local() {
        let (_, cache) = cache_with_remote();
        cache.set("products:2", &product(2), 60, &[]).await.unwrap();
        cache.local.clear();

        assert_eq!(cache.get::<Product>("products:2").await, Some(product(2)));
        assert!(cache.local.get("products:2").is_some());

        let metrics = cache.metrics();
        assert_eq!(metrics.remote_hits, 1);
        assert_eq!(metrics.local_hits, 0);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_a_miss() {
        let (_, cache) = cache_with_remote();
        cache.set("k", &"a string", 60, &[]).await.unwrap();

        assert_eq!(cache.get::<Product>("k").await, None);
        assert!(cache.local.get("k").is_none(), "undecodable entry is dropped locally");
        assert_eq!(cache.metrics().codec_errors, 1);
    }

    #[tokio::test]
    async fn test_corrupt_remote_payload_is_a_miss() {
        let (remote, cache) = cache_with_remote();
        remote.set_with_ttl("k", &[0x07, 1, 2, 3], 60).await.unwrap();

        assert_eq!(cache.get::<Product>("k").await, None);
        assert!(cache.local.get("k").is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_everywhere() {
        let (remote, cache) = cache_with_remote();
        cache.set("products:3", &product(3), 60, &["category:hats"]).await.unwrap();

        cache.delete("products:3").await;

        assert!(cache.local.get("products:3").is_none());
        assert!(!remote.contains("products:3"));
        assert!(remote.members_of_tag("category:hats").await.unwrap().is_empty());
        assert!(remote.tags_of_key("products:3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_only_mode() {
        let cache = CacheOrchestrator::new(CacheConfig::default(), None).unwrap();
        cache.set("k", &product(9), 60, &["t"]).await.unwrap();

        assert_eq!(cache.get::<Product>("k").await, Some(product(9)));
        cache.delete("k").await;
        assert_eq!(cache.get::<Product>("k").await, None);
        assert_eq!(cache.circuit_state(), CircuitState::Closed);
        assert_eq!(cache.metrics().remote_skipped, 0);
    }

    #[tokio::test]
    async fn test_unserializable_value_is_reported_and_not_stored() {
        let (remote, cache) = cache_with_remote();
        // JSON object keys must be strings
        let value = std::collections::HashMap::from([((1u32, 2u32), 3u32)]);

        assert!(cache.set("k", &value, 60, &["t"]).await.is_err());

        assert!(cache.local.get("k").is_none());
        assert!(!remote.contains("k"));
        assert!(remote.members_of_tag("t").await.unwrap().is_empty());
        let metrics = cache.metrics();
        assert_eq!(metrics.codec_errors, 1);
        assert_eq!(metrics.sets, 0);
    }

    #[tokio::test]
    async fn test_huge_ttl_is_clamped() {
        let (remote, cache) = cache_with_remote();
        cache.set("k", &1u32, u64::MAX, &["t"]).await.unwrap();

        assert_eq!(cache.get::<u32>("k").await, Some(1));
        let ttl = remote.ttl("k").unwrap();
        assert!(ttl <= Duration::from_secs(crate::config::MAX_TTL_SECS));
        assert!(ttl > Duration::from_secs(crate::config::MAX_TTL_SECS - 60));
    }
}
