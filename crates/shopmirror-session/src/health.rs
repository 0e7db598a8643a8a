//! Volatile-tier health monitoring and circuit breaking.
//!
//! All cache traffic goes through [`CacheHealthMonitor`] so that an
//! unhealthy tier degrades to "skip cache, use durable store" instead of
//! surfacing an error or waiting out a timeout on every call.
//!
//! State transitions:
//!
//! - **unhealthy** only after `failure_threshold` consecutive probe
//!   failures, avoiding flapping on a single blip
//! - **healthy** again on the next successful probe (single success
//!   suffices): fast recovery, one extra miss-and-fallback cycle at worst

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cache::{CacheError, TokenCache};
use crate::config::HealthConfig;

/// Read-only health snapshot, shaped for the external health endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHealth {
    /// Current circuit state.
    pub healthy: bool,
    /// Consecutive probe failures since the last successful probe.
    pub consecutive_failures: u32,
    /// RFC 3339 timestamp of the most recent failure, if any.
    pub last_failure_time: Option<String>,
    /// Duration of the most recent probe in milliseconds.
    pub response_time_ms: u64,
}

/// Health-aware wrapper around a [`TokenCache`].
///
/// Cache errors are absorbed here: reads degrade to a miss, writes to a
/// no-op, and the failure is recorded for the health endpoint. Only the
/// canary probe moves the circuit, in either direction: a scattered
/// operation error is a blip, not a verdict on the tier.
pub struct CacheHealthMonitor {
    cache: Arc<dyn TokenCache>,
    config: HealthConfig,
    healthy: AtomicBool,
    consecutive_failures: AtomicU32,
    last_failure_unix: AtomicU64,
    last_probe_ms: AtomicU64,
}

impl CacheHealthMonitor {
    /// Wraps a cache tier. The monitor starts healthy.
    #[must_use]
    pub fn new(cache: Arc<dyn TokenCache>, config: HealthConfig) -> Self {
        Self {
            cache,
            config,
            healthy: AtomicBool::new(true),
            consecutive_failures: AtomicU32::new(0),
            last_failure_unix: AtomicU64::new(0),
            last_probe_ms: AtomicU64::new(0),
        }
    }

    /// Current circuit state.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Snapshot for the health endpoint.
    #[must_use]
    pub fn snapshot(&self) -> CacheHealth {
        let last_failure_time = match self.last_failure_unix.load(Ordering::Relaxed) {
            0 => None,
            secs => OffsetDateTime::from_unix_timestamp(secs as i64)
                .ok()
                .and_then(|t| t.format(&Rfc3339).ok()),
        };
        CacheHealth {
            healthy: self.is_healthy(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_failure_time,
            response_time_ms: self.last_probe_ms.load(Ordering::Relaxed),
        }
    }

    /// Reads a token; unhealthy tier or any cache error degrades to `None`.
    pub async fn get(&self, key: &str) -> Option<String> {
        if !self.is_healthy() {
            return None;
        }
        match self.cache.get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                self.record_op_failure("GET", &e);
                None
            }
        }
    }

    /// Writes a token through to the cache. Returns `false` when skipped
    /// or failed; callers never need to care.
    pub async fn set(&self, key: &str, token: &str, ttl: Duration) -> bool {
        if !self.is_healthy() {
            return false;
        }
        match self.cache.set(key, token, ttl).await {
            Ok(()) => true,
            Err(e) => {
                self.record_op_failure("SET", &e);
                false
            }
        }
    }

    /// Deletes one entry. Returns `false` when skipped or failed.
    pub async fn delete(&self, key: &str) -> bool {
        if !self.is_healthy() {
            return false;
        }
        match self.cache.delete(key).await {
            Ok(()) => true,
            Err(e) => {
                self.record_op_failure("DEL", &e);
                false
            }
        }
    }

    /// Purges every key under `prefix`. Returns the number removed, zero
    /// when skipped or failed.
    pub async fn purge_prefix(&self, prefix: &str) -> u64 {
        if !self.is_healthy() {
            return 0;
        }
        match self.cache.purge_prefix(prefix).await {
            Ok(n) => n,
            Err(e) => {
                self.record_op_failure("PURGE", &e);
                0
            }
        }
    }

    /// Runs one canary probe, updating circuit state.
    pub async fn probe_once(&self) {
        let started = Instant::now();
        let result = self.cache.probe().await;
        self.last_probe_ms
            .store(started.elapsed().as_millis() as u64, Ordering::Relaxed);

        match result {
            Ok(()) => {
                let was_unhealthy = !self.healthy.swap(true, Ordering::Relaxed);
                self.consecutive_failures.store(0, Ordering::Relaxed);
                if was_unhealthy {
                    tracing::info!("cache tier recovered, circuit closed");
                }
            }
            Err(e) => self.record_probe_failure(&e),
        }
    }

    /// Spawns the background probe loop. The task exits when `shutdown`
    /// flips to `true` or the sender is dropped.
    pub fn spawn_probe(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let mut interval = tokio::time::interval(self.config.probe_interval);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = interval.tick() => self.probe_once().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::debug!("cache probe task stopping");
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Operation failures are absorbed and surfaced in the snapshot, but
    /// never move the circuit; the probe owns that decision.
    fn record_op_failure(&self, op: &str, err: &CacheError) {
        self.last_failure_unix.store(
            OffsetDateTime::now_utc().unix_timestamp().max(0) as u64,
            Ordering::Relaxed,
        );
        tracing::warn!(op = op, error = %err, "cache operation failed");
    }

    fn record_probe_failure(&self, err: &CacheError) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_failure_unix.store(
            OffsetDateTime::now_utc().unix_timestamp().max(0) as u64,
            Ordering::Relaxed,
        );

        tracing::warn!(
            consecutive_failures = failures,
            error = %err,
            "cache probe failed"
        );

        if failures >= self.config.failure_threshold && self.healthy.swap(false, Ordering::Relaxed)
        {
            tracing::error!(
                consecutive_failures = failures,
                "cache tier unhealthy, circuit open"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheResult, LocalTokenCache};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Cache double that fails every operation until told otherwise.
    struct FlakyCache {
        failing: AtomicBool,
        calls: AtomicUsize,
    }

    impl FlakyCache {
        fn new(failing: bool) -> Self {
            Self {
                failing: AtomicBool::new(failing),
                calls: AtomicUsize::new(0),
            }
        }

        fn outcome(&self) -> CacheResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                Err(CacheError::backend("connection refused"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl TokenCache for FlakyCache {
        async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
            self.outcome().map(|()| None)
        }
        async fn set(&self, _key: &str, _token: &str, _ttl: Duration) -> CacheResult<()> {
            self.outcome()
        }
        async fn delete(&self, _key: &str) -> CacheResult<()> {
            self.outcome()
        }
        async fn purge_prefix(&self, _prefix: &str) -> CacheResult<u64> {
            self.outcome().map(|()| 0)
        }
        async fn probe(&self) -> CacheResult<()> {
            self.outcome()
        }
    }

    fn monitor(cache: Arc<dyn TokenCache>) -> CacheHealthMonitor {
        CacheHealthMonitor::new(cache, HealthConfig::default())
    }

    #[tokio::test]
    async fn test_hysteresis_three_down_one_up() {
        let cache = Arc::new(FlakyCache::new(true));
        let monitor = monitor(cache.clone());

        monitor.probe_once().await;
        monitor.probe_once().await;
        assert!(monitor.is_healthy(), "two failures must not open circuit");

        monitor.probe_once().await;
        assert!(!monitor.is_healthy(), "third failure opens the circuit");
        assert_eq!(monitor.snapshot().consecutive_failures, 3);

        cache.failing.store(false, Ordering::SeqCst);
        monitor.probe_once().await;
        assert!(monitor.is_healthy(), "one success closes the circuit");
        assert_eq!(monitor.snapshot().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_unhealthy_tier_is_never_consulted() {
        let cache = Arc::new(FlakyCache::new(true));
        let monitor = monitor(cache.clone());
        for _ in 0..3 {
            monitor.probe_once().await;
        }
        assert!(!monitor.is_healthy());
        let probes = cache.calls.load(Ordering::SeqCst);

        assert_eq!(monitor.get("k").await, None);
        assert!(!monitor.set("k", "v", Duration::from_secs(1)).await);
        assert!(!monitor.delete("k").await);
        assert_eq!(monitor.purge_prefix("k").await, 0);
        assert_eq!(
            cache.calls.load(Ordering::SeqCst),
            probes,
            "wrapper must short-circuit when unhealthy"
        );
    }

    #[tokio::test]
    async fn test_operation_errors_are_absorbed() {
        let cache = Arc::new(FlakyCache::new(true));
        let monitor = monitor(cache);

        // Healthy circuit, failing backend: errors degrade to miss/no-op.
        assert_eq!(monitor.get("k").await, None);
        assert!(!monitor.set("k", "v", Duration::from_secs(1)).await);
        let snapshot = monitor.snapshot();
        assert!(snapshot.healthy);
        assert!(snapshot.last_failure_time.is_some());
    }

    /// Cache double whose reads fail while writes and probes succeed.
    struct ReadFailingCache;

    #[async_trait]
    impl TokenCache for ReadFailingCache {
        async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
            Err(CacheError::backend("read timeout"))
        }
        async fn set(&self, _key: &str, _token: &str, _ttl: Duration) -> CacheResult<()> {
            Ok(())
        }
        async fn delete(&self, _key: &str) -> CacheResult<()> {
            Ok(())
        }
        async fn purge_prefix(&self, _prefix: &str) -> CacheResult<u64> {
            Ok(0)
        }
        async fn probe(&self) -> CacheResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_operation_failures_never_open_the_circuit() {
        let monitor = monitor(Arc::new(ReadFailingCache));

        // Well past the threshold: every read fails, every probe passes.
        for _ in 0..5 {
            assert_eq!(monitor.get("k").await, None);
            monitor.probe_once().await;
        }

        let snapshot = monitor.snapshot();
        assert!(snapshot.healthy, "op blips must not flip the circuit");
        assert_eq!(snapshot.consecutive_failures, 0);
        // Writes still flow through the healthy circuit.
        assert!(monitor.set("k", "v", Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_healthy_passthrough() {
        let monitor = monitor(Arc::new(LocalTokenCache::new()));
        assert!(monitor.set("k", "tok", Duration::from_secs(60)).await);
        assert_eq!(monitor.get("k").await, Some("tok".to_string()));
        assert!(monitor.delete("k").await);
        assert_eq!(monitor.get("k").await, None);
    }

    #[test]
    fn test_health_payload_shape() {
        let monitor = monitor(Arc::new(LocalTokenCache::new()));
        let json = serde_json::to_value(monitor.snapshot()).unwrap();
        assert_eq!(json["healthy"], true);
        assert_eq!(json["consecutiveFailures"], 0);
        assert!(json["lastFailureTime"].is_null());
        assert!(json["responseTimeMs"].is_u64());
    }
}
