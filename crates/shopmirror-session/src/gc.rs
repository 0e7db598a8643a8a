//! Scheduled session garbage collection.
//!
//! Two independent jobs, both idempotent and safe to run concurrently
//! with live traffic:
//!
//! - the **expired sweep** deactivates sessions whose `expires_at` has
//!   passed, in bounded batches, and purges their cache entries
//! - the **inactive sweep** deactivates long-idle sessions and
//!   hard-deletes the oldest ones to bound storage growth
//!
//! A failed run is logged and the schedule continues; nothing here ever
//! cancels a job permanently.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cache::CacheKeys;
use crate::config::GcConfig;
use crate::error::SessionResult;
use crate::health::CacheHealthMonitor;
use crate::store::SessionStore;

/// Periodic session garbage collector.
pub struct SessionGc {
    sessions: Arc<dyn SessionStore>,
    cache: Arc<CacheHealthMonitor>,
    config: GcConfig,
}

impl SessionGc {
    /// Creates a collector over the given tiers.
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        cache: Arc<CacheHealthMonitor>,
        config: GcConfig,
    ) -> Self {
        Self {
            sessions,
            cache,
            config,
        }
    }

    /// Runs one expired-session sweep to completion, batch by batch.
    /// Returns the number of sessions deactivated.
    pub async fn run_expired_sweep(&self) -> SessionResult<u64> {
        let mut total = 0u64;
        loop {
            let now = OffsetDateTime::now_utc();
            let evicted = self
                .sessions
                .deactivate_expired(now, self.config.sweep_batch_size)
                .await?;
            let batch_len = evicted.len();
            total += batch_len as u64;

            for session in &evicted {
                self.cache
                    .delete(&CacheKeys::session(&session.domain, &session.session_id))
                    .await;
            }

            if batch_len < self.config.sweep_batch_size as usize {
                break;
            }
        }

        if total > 0 {
            tracing::info!(count = total, "expired sessions deactivated");
        }
        Ok(total)
    }

    /// Runs one inactive-session sweep. Returns
    /// `(deactivated, hard_deleted)` counts.
    pub async fn run_inactive_sweep(&self) -> SessionResult<(u64, u64)> {
        let now = OffsetDateTime::now_utc();

        let deactivated = self
            .sessions
            .deactivate_inactive(now - self.config.inactive_after)
            .await?;
        let deleted = self
            .sessions
            .delete_inactive(now - self.config.delete_after)
            .await?;

        if deactivated > 0 || deleted > 0 {
            tracing::info!(
                deactivated = deactivated,
                deleted = deleted,
                "inactive sessions swept"
            );
        }
        Ok((deactivated, deleted))
    }

    /// Spawns both sweeps on their configured intervals. Tasks exit when
    /// `shutdown` flips to `true` or its sender is dropped.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let expired = {
            let gc = self.clone();
            let mut shutdown = shutdown.clone();
            let mut interval = tokio::time::interval(gc.config.expired_sweep_interval);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = gc.run_expired_sweep().await {
                                tracing::warn!(error = %e, "expired-session sweep failed");
                            }
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                tracing::debug!("expired-session sweep stopping");
                                return;
                            }
                        }
                    }
                }
            })
        };

        let inactive = {
            let gc = self;
            let mut shutdown = shutdown;
            let mut interval = tokio::time::interval(gc.config.inactive_sweep_interval);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = gc.run_inactive_sweep().await {
                                tracing::warn!(error = %e, "inactive-session sweep failed");
                            }
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                tracing::debug!("inactive-session sweep stopping");
                                return;
                            }
                        }
                    }
                }
            })
        };

        vec![expired, inactive]
    }
}
