//! Redis remote tier.
//!
//! Values are stored as plain Redis strings holding the codec payload
//! (marker byte + JSON or zstd), written with `SETEX` so expiry is enforced
//! server-side. The tag index lives in the same database as two families of
//! SETs under a reserved namespace:
//!
//! ```text
//! {prefix}{key}              STRING  codec payload, TTL = caller TTL
//! {prefix}__tag:{tag}        SET     keys stored under `tag`, TTL = longest member TTL
//! {prefix}__keytags:{key}    SET     tags `key` was stored under, TTL = value TTL
//! ```
//!
//! Both SETs are updated in one `MULTI`/`EXEC` pipeline so the two directions
//! never diverge because of a partial write. The tag set TTL only ever grows
//! (`EXPIRE .. NX` then `EXPIRE .. GT`), which needs Redis 7 or newer.
//! Operations are bounded by a timeout and are not retried.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, pipe, AsyncCommands, Client};
use tracing::{debug, info};

use super::traits::{RemoteError, RemoteTier, ScanPage};
use crate::config::MAX_TTL_SECS;
use crate::resilience::retry::{retry, RetryConfig};

const TAG_NAMESPACE: &str = "__tag:";
const KEY_TAGS_NAMESPACE: &str = "__keytags:";

impl From<redis::RedisError> for RemoteError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
            RemoteError::Connection(e.to_string())
        } else {
            RemoteError::Backend(e.to_string())
        }
    }
}

pub struct RedisTier {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "catalog:" → "catalog:products:1")
    prefix: String,
    timeout: Duration,
}

impl RedisTier {
    /// Connect, retrying with backoff while Redis comes up.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use catalog_cache::storage::redis::RedisTier;
    /// # use std::time::Duration;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// // Keys will be prefixed: "catalog:products:1", "catalog:__tag:category:shoes"
    /// let tier = RedisTier::connect("redis://localhost", "catalog:", Duration::from_secs(2)).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(connection_string: &str, prefix: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::open(connection_string)
            .map_err(|e| RemoteError::Connection(e.to_string()))?;

        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| RemoteError::Connection(e.to_string()))?;

        info!(prefix = %prefix, "Connected to Redis remote tier");
        Ok(Self {
            connection,
            prefix: prefix.to_string(),
            timeout,
        })
    }

    /// Get the configured prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[inline]
    fn value_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    #[inline]
    fn tag_key(&self, tag: &str) -> String {
        format!("{}{}{}", self.prefix, TAG_NAMESPACE, tag)
    }

    #[inline]
    fn key_tags_key(&self, key: &str) -> String {
        format!("{}{}{}", self.prefix, KEY_TAGS_NAMESPACE, key)
    }

    /// Strip the prefix, returning `None` for index bookkeeping keys.
    fn logical_key<'a>(&self, raw: &'a str) -> Option<&'a str> {
        let key = raw.strip_prefix(self.prefix.as_str())?;
        if key.starts_with(TAG_NAMESPACE) || key.starts_with(KEY_TAGS_NAMESPACE) {
            None
        } else {
            Some(key)
        }
    }

    async fn timed<T, F>(&self, operation: &'static str, fut: F) -> Result<T, RemoteError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(RemoteError::from),
            Err(_) => Err(RemoteError::Timeout {
                operation,
                after: self.timeout,
            }),
        }
    }

    async fn scan_raw(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>), RemoteError> {
        let mut conn = self.connection.clone();
        self.timed(
            "scan",
            cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(count)
                .query_async::<(u64, Vec<String>)>(&mut conn),
        )
        .await
    }
}

#[async_trait]
impl RemoteTier for RedisTier {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let mut conn = self.connection.clone();
        let key = self.value_key(key);
        self.timed("get", conn.get::<_, Option<Vec<u8>>>(&key)).await
    }

    async fn set_with_ttl(&self, key: &str, payload: &[u8], ttl_secs: u64) -> Result<(), RemoteError> {
        let mut conn = self.connection.clone();
        let key = self.value_key(key);
        let ttl_secs = ttl_secs.clamp(1, MAX_TTL_SECS);
        self.timed("set", conn.set_ex::<_, _, ()>(&key, payload, ttl_secs)).await
    }

    async fn delete(&self, key: &str) -> Result<bool, RemoteError> {
        let mut conn = self.connection.clone();
        let key = self.value_key(key);
        let removed: u64 = self.timed("delete", conn.del(&key)).await?;
        Ok(removed > 0)
    }

    /// Single `DEL` with every key of the batch.
    async fn delete_many(&self, keys: &[String]) -> Result<u64, RemoteError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.clone();
        let prefixed: Vec<String> = keys.iter().map(|k| self.value_key(k)).collect();
        self.timed("delete_many", conn.del::<_, u64>(&prefixed)).await
    }

    async fn scan_page(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage, RemoteError> {
        let full_pattern = format!("{}{}", escape_glob(&self.prefix), pattern);
        let (next, raw) = self.scan_raw(cursor, &full_pattern, count).await?;
        let keys = raw
            .iter()
            .filter_map(|k| self.logical_key(k))
            .map(str::to_string)
            .collect();
        Ok(ScanPage { cursor: next, keys })
    }

    async fn add_key_to_tag(&self, tag: &str, key: &str, ttl_secs: u64) -> Result<(), RemoteError> {
        let mut conn = self.connection.clone();
        let tag_key = self.tag_key(tag);
        let key_tags_key = self.key_tags_key(key);
        let ttl_secs = ttl_secs.clamp(1, MAX_TTL_SECS);
        let mut pipeline = pipe();
        pipeline
            .atomic()
            .sadd(&tag_key, key)
            .ignore()
            .sadd(&key_tags_key, tag)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key_tags_key)
            .arg(ttl_secs)
            .ignore()
            .cmd("EXPIRE")
            .arg(&tag_key)
            .arg(ttl_secs)
            .arg("NX")
            .ignore()
            .cmd("EXPIRE")
            .arg(&tag_key)
            .arg(ttl_secs)
            .arg("GT")
            .ignore();
        self.timed("add_key_to_tag", pipeline.query_async::<()>(&mut conn)).await
    }

    async fn remove_key_from_tag(&self, tag: &str, key: &str) -> Result<(), RemoteError> {
        let mut conn = self.connection.clone();
        let mut pipeline = pipe();
        pipeline
            .atomic()
            .srem(self.tag_key(tag), key)
            .ignore()
            .srem(self.key_tags_key(key), tag)
            .ignore();
        self.timed("remove_key_from_tag", pipeline.query_async::<()>(&mut conn)).await
    }

    async fn members_of_tag(&self, tag: &str) -> Result<HashSet<String>, RemoteError> {
        let mut conn = self.connection.clone();
        let key = self.tag_key(tag);
        self.timed("members_of_tag", conn.smembers::<_, HashSet<String>>(&key)).await
    }

    async fn tags_of_key(&self, key: &str) -> Result<HashSet<String>, RemoteError> {
        let mut conn = self.connection.clone();
        let key = self.key_tags_key(key);
        self.timed("tags_of_key", conn.smembers::<_, HashSet<String>>(&key)).await
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        let mut conn = self.connection.clone();
        let _: String = self.timed("ping", cmd("PING").query_async::<String>(&mut conn)).await?;
        Ok(())
    }

    /// `FLUSHDB` without a prefix; otherwise cursor-delete everything under it.
    async fn flush(&self) -> Result<(), RemoteError> {
        let mut conn = self.connection.clone();
        if self.prefix.is_empty() {
            return self.timed("flush", cmd("FLUSHDB").query_async::<()>(&mut conn)).await;
        }

        let pattern = format!("{}*", escape_glob(&self.prefix));
        let mut cursor = 0u64;
        let mut total = 0u64;
        loop {
            let (next, keys) = self.scan_raw(cursor, &pattern, 500).await?;
            if !keys.is_empty() {
                total += self.timed("flush", conn.del::<_, u64>(&keys)).await?;
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        debug!(prefix = %self.prefix, deleted = total, "Flushed prefixed keyspace");
        Ok(())
    }
}

/// Escape glob metacharacters so a literal prefix can lead a MATCH pattern.
fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
