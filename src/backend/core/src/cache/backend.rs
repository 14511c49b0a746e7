//! Remote tier backends.
//!
//! This module provides the [`CacheStore`] contract and two implementations:
//! - **MemoryBackend**: process-local, TTL-aware store with no failure modes
//! - **RedisStore**: network-backed store using Redis

use crate::cache::pattern::compile_glob;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use metrics::counter;
use redis::AsyncCommands;
use std::time::{Duration, Instant};
use tracing::{debug, info};

// ═══════════════════════════════════════════════════════════════════════════════
// Backend Contract
// ═══════════════════════════════════════════════════════════════════════════════

/// Contract for a key-value backend that can serve as the remote tier.
///
/// Values are opaque serialized strings. Every method may fail; the tiered
/// cache treats any error (or a timeout around the call) as a signal against
/// backend health and never surfaces it to its own callers.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a serialized entry, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a serialized entry for `ttl_seconds`.
    async fn set(&self, key: &str, value: String, ttl_seconds: u64) -> Result<()>;

    /// Delete a key, returning the number of keys removed (0 or 1).
    async fn delete(&self, key: &str) -> Result<u64>;

    /// Check if a key exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// List keys matching a glob pattern (`*`, `?`).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Liveness probe. Healthy backends answer `PONG`.
    async fn ping(&self) -> Result<String>;

    /// Get the backend name.
    fn name(&self) -> &'static str;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Memory Backend
// ═══════════════════════════════════════════════════════════════════════════════

struct MemoryRecord {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryRecord {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Process-local [`CacheStore`].
///
/// A TTL of zero seconds stores the value without expiry.
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<String, MemoryRecord>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys, including ones that expired but were not yet
    /// touched.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let expired = match self.entries.get(key) {
            Some(record) if !record.is_expired() => return Ok(Some(record.value.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove_if(key, |_, record| record.is_expired());
            debug!(key = key, "Dropped expired entry from memory backend");
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl_seconds: u64) -> Result<()> {
        // A TTL past the end of `Instant` is treated as no expiry.
        let expires_at = (ttl_seconds > 0)
            .then(|| Instant::now().checked_add(Duration::from_secs(ttl_seconds)))
            .flatten();
        self.entries
            .insert(key.to_string(), MemoryRecord { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        Ok(u64::from(self.entries.remove(key).is_some()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self
            .entries
            .get(key)
            .is_some_and(|record| !record.is_expired()))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = compile_glob(pattern)?;
        Ok(self
            .entries
            .iter()
            .filter(|e| !e.value().is_expired() && matcher.is_match(e.key()))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn ping(&self) -> Result<String> {
        Ok("PONG".to_string())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Redis Backend
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for the Redis store.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL
    pub url: String,

    /// Key prefix
    pub key_prefix: String,

    /// SCAN batch size used by key listing
    pub scan_count: usize,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "tiercache:".to_string(),
            scan_count: 100,
        }
    }
}

/// Redis-backed [`CacheStore`].
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
    config: RedisStoreConfig,
}

impl RedisStore {
    /// Connect and verify the connection with a PING.
    pub async fn connect(config: RedisStoreConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            CacheError::backend_unavailable("Failed to create Redis client").with_source(e)
        })?;

        let mut conn = redis::aio::ConnectionManager::new(client).await?;

        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            return Err(CacheError::unexpected_reply(pong));
        }

        info!(url = %config.url, prefix = %config.key_prefix, "Redis cache backend connected");

        Ok(Self { conn, config })
    }

    /// Build the full key with prefix.
    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(self.full_key(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(self.full_key(key), value, ttl_seconds.max(1))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let deleted: i64 = conn.del(self.full_key(key)).await?;
        Ok(deleted.max(0) as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(self.full_key(key)).await?;
        Ok(exists)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let full_pattern = self.full_key(pattern);
        let prefix_len = self.config.key_prefix.len();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (new_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&full_pattern)
                .arg("COUNT")
                .arg(self.config.scan_count)
                .query_async(&mut conn)
                .await?;

            keys.extend(
                batch
                    .into_iter()
                    .filter(|k| k.len() > prefix_len)
                    .map(|k| k[prefix_len..].to_string()),
            );

            cursor = new_cursor;
            if cursor == 0 {
                break;
            }
        }

        counter!("tiercache_backend_scans_total", "backend" => "redis").increment(1);
        Ok(keys)
    }

    async fn ping(&self) -> Result<String> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
