//! Asynchronous "last accessed" heartbeat.
//!
//! Cache hits must not pay for a durable-store write, so heartbeats are
//! queued on an unbounded channel and flushed by a background worker in
//! de-duplicated batches. Failures are logged and dropped; nothing here
//! ever raises back to the request path.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::store::SessionStore;

/// Upper bound on session IDs flushed in one store call.
const MAX_FLUSH_BATCH: usize = 256;

/// Fire-and-forget handle for scheduling heartbeats.
///
/// Cheap to clone; the worker task stops once every handle is dropped.
#[derive(Clone)]
pub struct HeartbeatUpdater {
    tx: mpsc::UnboundedSender<String>,
}

impl HeartbeatUpdater {
    /// Spawns the worker task and returns the handle plus its join handle.
    ///
    /// `timeout` is the budget for one batched `touch_sessions` write
    /// (single-row-class update, seconds not tens of seconds).
    pub fn spawn(store: Arc<dyn SessionStore>, timeout: Duration) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_worker(store, rx, timeout));
        (Self { tx }, handle)
    }

    /// Schedules a `last_accessed_at` refresh for a session. Never blocks
    /// and never fails from the caller's perspective.
    pub fn touch(&self, session_id: &str) {
        if self.tx.send(session_id.to_string()).is_err() {
            // Worker already stopped (shutdown); the heartbeat is dropped.
            tracing::debug!(session_id = %session_id, "heartbeat worker gone, dropping touch");
        }
    }
}

async fn run_worker(
    store: Arc<dyn SessionStore>,
    mut rx: mpsc::UnboundedReceiver<String>,
    timeout: Duration,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while batch.len() < MAX_FLUSH_BATCH {
            match rx.try_recv() {
                Ok(id) => batch.push(id),
                Err(_) => break,
            }
        }
        batch.sort_unstable();
        batch.dedup();

        let now = OffsetDateTime::now_utc();
        match tokio::time::timeout(timeout, store.touch_sessions(&batch, now)).await {
            Ok(Ok(())) => {
                tracing::trace!(count = batch.len(), "heartbeat batch flushed");
            }
            Ok(Err(e)) => {
                tracing::warn!(count = batch.len(), error = %e, "heartbeat flush failed");
            }
            Err(_) => {
                tracing::warn!(count = batch.len(), "heartbeat flush timed out");
            }
        }
    }
    tracing::debug!("heartbeat worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SessionError, SessionResult};
    use crate::memory::MemorySessionStore;
    use crate::model::{EvictedSession, RequestMeta, Session};
    use crate::store::TenantStore;
    use async_trait::async_trait;
    use uuid::Uuid;

    /// Store double whose writes always fail.
    struct BrokenStore;

    #[async_trait]
    impl SessionStore for BrokenStore {
        async fn find_session(
            &self,
            _tenant_id: Uuid,
            _session_id: &str,
        ) -> SessionResult<Option<Session>> {
            Err(SessionError::store("down"))
        }
        async fn find_active_session(
            &self,
            _tenant_id: Uuid,
            _session_id: &str,
        ) -> SessionResult<Option<Session>> {
            Err(SessionError::store("down"))
        }
        async fn find_most_recent_active(
            &self,
            _tenant_id: Uuid,
        ) -> SessionResult<Option<Session>> {
            Err(SessionError::store("down"))
        }
        async fn upsert_session(
            &self,
            _tenant_id: Uuid,
            _session_id: &str,
            _access_token: &str,
            _expires_at: OffsetDateTime,
            _meta: &RequestMeta,
        ) -> SessionResult<Session> {
            Err(SessionError::store("down"))
        }
        async fn list_active(&self, _tenant_id: Uuid) -> SessionResult<Vec<Session>> {
            Err(SessionError::store("down"))
        }
        async fn count_active(&self, _tenant_id: Uuid) -> SessionResult<u64> {
            Err(SessionError::store("down"))
        }
        async fn deactivate_session(
            &self,
            _tenant_id: Uuid,
            _session_id: &str,
        ) -> SessionResult<bool> {
            Err(SessionError::store("down"))
        }
        async fn deactivate_all(&self, _tenant_id: Uuid) -> SessionResult<u64> {
            Err(SessionError::store("down"))
        }
        async fn touch_sessions(
            &self,
            _session_ids: &[String],
            _now: OffsetDateTime,
        ) -> SessionResult<()> {
            Err(SessionError::store("down"))
        }
        async fn deactivate_expired(
            &self,
            _now: OffsetDateTime,
            _batch: u32,
        ) -> SessionResult<Vec<EvictedSession>> {
            Err(SessionError::store("down"))
        }
        async fn deactivate_inactive(&self, _cutoff: OffsetDateTime) -> SessionResult<u64> {
            Err(SessionError::store("down"))
        }
        async fn delete_inactive(&self, _cutoff: OffsetDateTime) -> SessionResult<u64> {
            Err(SessionError::store("down"))
        }
    }

    #[tokio::test]
    async fn test_touches_advance_last_accessed() {
        let store = Arc::new(MemorySessionStore::new());
        let tenant = store.upsert_tenant("acme.myshopify.com", "tok").await.unwrap();
        let created = store
            .upsert_session(
                tenant.id,
                "sess-a",
                "tok",
                OffsetDateTime::now_utc() + time::Duration::hours(4),
                &RequestMeta::default(),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;

        let (updater, worker) =
            HeartbeatUpdater::spawn(store.clone(), Duration::from_secs(3));
        updater.touch("sess-a");
        updater.touch("sess-a"); // duplicate, collapsed into one write
        drop(updater);
        worker.await.unwrap();

        let touched = store.raw_session(tenant.id, "sess-a").unwrap();
        assert!(touched.last_accessed_at > created.last_accessed_at);
    }

    #[tokio::test]
    async fn test_store_failure_is_dropped_not_raised() {
        let (updater, worker) =
            HeartbeatUpdater::spawn(Arc::new(BrokenStore), Duration::from_secs(3));
        updater.touch("sess-a");
        drop(updater);
        // Worker survives the failure and exits cleanly on channel close.
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_touch_after_worker_stop_is_a_noop() {
        let store = Arc::new(MemorySessionStore::new());
        let (updater, worker) = HeartbeatUpdater::spawn(store, Duration::from_secs(3));
        let clone = updater.clone();
        drop(updater);
        clone.touch("sess-a");
        drop(clone);
        worker.await.unwrap();
    }
}
