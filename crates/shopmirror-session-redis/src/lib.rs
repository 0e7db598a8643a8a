//! Redis cache tier for shopmirror-session
//!
//! Implements the `TokenCache` trait over a deadpool-managed Redis pool.
//! Errors are returned raw; the session layer's health monitor decides
//! whether to absorb them or open the circuit. Nothing stored here is
//! authoritative, so a flushed or restarted Redis only costs latency.
//!
//! # Example
//!
//! ```ignore
//! use shopmirror_session_redis::RedisTokenCache;
//!
//! let cache = RedisTokenCache::connect("redis://localhost:6379")?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;

use shopmirror_session::{CacheError, CacheResult, TokenCache};

/// Keys scanned per SCAN round during a prefix purge.
const SCAN_COUNT: usize = 100;

/// Canary key written by the health probe.
const PROBE_KEY: &str = "shopmirror:probe";

/// Redis-backed token cache.
///
/// Cheap to clone; connections are checked out of the pool per operation.
#[derive(Clone)]
pub struct RedisTokenCache {
    pool: Pool,
}

impl RedisTokenCache {
    /// Create a cache over an existing pool.
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a cache by building a pool from a Redis URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the pool cannot be
    /// created. Connections themselves are established lazily.
    pub fn connect(url: &str) -> CacheResult<Self> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(CacheError::backend)?;
        Ok(Self::new(pool))
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn conn(&self) -> CacheResult<deadpool_redis::Connection> {
        self.pool.get().await.map_err(CacheError::backend)
    }
}

#[async_trait]
impl TokenCache for RedisTokenCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(CacheError::backend)
    }

    async fn set(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        // SET EX rounds sub-second TTLs up to one second.
        let ttl_secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, token, ttl_secs)
            .await
            .map_err(CacheError::backend)
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(key).await.map_err(CacheError::backend)
    }

    async fn purge_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let mut conn = self.conn().await?;
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        // Cursor-based SCAN instead of KEYS: this runs on disconnect only,
        // but must not stall a shared Redis.
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(CacheError::backend)?;

            if !keys.is_empty() {
                let deleted: u64 = conn.del(&keys).await.map_err(CacheError::backend)?;
                removed += deleted;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        if removed > 0 {
            tracing::debug!(prefix = %prefix, count = removed, "purged cache entries");
        }
        Ok(removed)
    }

    async fn probe(&self) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(PROBE_KEY, "ok", 10)
            .await
            .map_err(CacheError::backend)?;

        let echoed: Option<String> = conn.get(PROBE_KEY).await.map_err(CacheError::backend)?;
        if echoed.as_deref() == Some("ok") {
            Ok(())
        } else {
            Err(CacheError::backend("probe canary read back a wrong value"))
        }
    }
}
