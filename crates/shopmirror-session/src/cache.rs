//! Volatile token cache tier.
//!
//! This module defines the cache seam (`TokenCache`), the cache key
//! shapes, and a local in-memory implementation backed by `DashMap`.
//!
//! Cache entries are never authoritative: the tier may be evicted,
//! corrupted, or unavailable at any time without violating correctness,
//! only latency. Call sites must route all cache traffic through the
//! [`CacheHealthMonitor`](crate::health::CacheHealthMonitor) wrapper
//! rather than calling a `TokenCache` directly.
//!
//! # Key Shapes
//!
//! Two keys exist for the same token:
//!
//! - session-scoped: `shopmirror:token:{domain}:{session_id}`
//! - tenant-scoped: `shopmirror:token:{domain}` (most-recently-cached
//!   token for the tenant, used by fallback lookups without a session ID)

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

/// Error from the volatile tier. Absorbed by the health monitor; it never
/// propagates past it.
#[derive(Debug, thiserror::Error)]
#[error("Cache error: {0}")]
pub struct CacheError(pub String);

impl CacheError {
    /// Wraps any displayable backend error.
    #[must_use]
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self(err.to_string())
    }
}

/// Result type for raw cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Key prefix shared by every entry this subsystem writes.
const KEY_PREFIX: &str = "shopmirror:token";

/// Builders for the two cache key shapes.
pub struct CacheKeys;

impl CacheKeys {
    /// Session-scoped key: `(domain, session_id) -> token`.
    #[must_use]
    pub fn session(domain: &str, session_id: &str) -> String {
        format!("{KEY_PREFIX}:{domain}:{session_id}")
    }

    /// Tenant-scoped key: `(domain) -> token`.
    #[must_use]
    pub fn tenant(domain: &str) -> String {
        format!("{KEY_PREFIX}:{domain}")
    }

    /// Prefix matching every session-scoped key of a tenant. Used only by
    /// the bulk purge on disconnect, which is rare and not
    /// latency-sensitive. The trailing separator keeps a look-alike domain
    /// (`a.myshopify.com` vs `a.myshopify.com.au`) out of the match; the
    /// tenant-scoped key itself is deleted separately.
    #[must_use]
    pub fn tenant_prefix(domain: &str) -> String {
        format!("{KEY_PREFIX}:{domain}:")
    }
}

/// Storage trait for the volatile token tier.
///
/// Implementations are provided for:
/// - local in-memory (`LocalTokenCache`, this module)
/// - Redis (`shopmirror-session-redis` crate)
#[async_trait]
pub trait TokenCache: Send + Sync {
    /// Gets a cached token. `Ok(None)` is a miss.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Stores a token under `key` with the given TTL.
    async fn set(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<()>;

    /// Removes a single entry. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Removes every entry whose key starts with `prefix`, returning the
    /// number removed. KEYS/SCAN-class operation; disconnect-only.
    async fn purge_prefix(&self, prefix: &str) -> CacheResult<u64>;

    /// Writes a canary value and reads it back. Used by the health probe.
    async fn probe(&self) -> CacheResult<()>;
}

/// A cached token with TTL support.
struct CachedToken {
    token: String,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedToken {
    fn new(token: String, ttl: Duration) -> Self {
        Self {
            token,
            cached_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Local in-memory token cache using DashMap.
///
/// Single-instance mode and test double. Thread-safe; shareable across
/// async tasks.
#[derive(Default)]
pub struct LocalTokenCache {
    entries: DashMap<String, CachedToken>,
}

impl LocalTokenCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    /// Returns `true` if no live entries remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TokenCache for LocalTokenCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.token.clone()));
            }
            drop(entry);
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<()> {
        self.entries
            .insert(key.to_string(), CachedToken::new(token.to_string(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn purge_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - self.entries.len()) as u64)
    }

    async fn probe(&self) -> CacheResult<()> {
        // Always reachable in-process.
        Ok(())
    }
}
