//! Session directory: wiring for the whole subsystem.
//!
//! Construction spawns the background pieces (health probe, garbage
//! collection sweeps, heartbeat worker) and hands back one handle exposing
//! the inbound surface: login, token resolution, termination and
//! introspection.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cache::TokenCache;
use crate::config::SessionCacheConfig;
use crate::error::SessionResult;
use crate::gc::SessionGc;
use crate::health::{CacheHealth, CacheHealthMonitor};
use crate::heartbeat::HeartbeatUpdater;
use crate::lifecycle::SessionManager;
use crate::model::{RequestMeta, Session};
use crate::resolver::TokenResolver;
use crate::store::{SessionStore, TenantStore};

/// Facade over the session and token-cache subsystem.
pub struct SessionDirectory {
    resolver: TokenResolver,
    manager: Arc<SessionManager>,
    health: Arc<CacheHealthMonitor>,
    heartbeat: HeartbeatUpdater,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionDirectory {
    /// Wires the tiers together and spawns the background tasks.
    #[must_use]
    pub fn new(
        tenants: Arc<dyn TenantStore>,
        sessions: Arc<dyn SessionStore>,
        cache: Arc<dyn TokenCache>,
        config: SessionCacheConfig,
    ) -> Self {
        let health = Arc::new(CacheHealthMonitor::new(cache, config.health.clone()));
        let (heartbeat, heartbeat_task) =
            HeartbeatUpdater::spawn(sessions.clone(), config.heartbeat_timeout);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = vec![heartbeat_task];
        tasks.push(health.clone().spawn_probe(shutdown_rx.clone()));

        let gc = Arc::new(SessionGc::new(
            sessions.clone(),
            health.clone(),
            config.gc.clone(),
        ));
        tasks.extend(gc.spawn(shutdown_rx));

        let resolver = TokenResolver::new(
            tenants.clone(),
            sessions.clone(),
            health.clone(),
            heartbeat.clone(),
            config.token_ttl,
        );
        let manager = Arc::new(SessionManager::new(tenants, sessions, health.clone(), config));

        Self {
            resolver,
            manager,
            health,
            heartbeat,
            shutdown,
            tasks,
        }
    }

    /// Inbound from the auth collaborator: a login succeeded upstream.
    pub async fn on_login_success(
        &self,
        domain: &str,
        session_id: &str,
        access_token: &str,
        meta: RequestMeta,
    ) -> SessionResult<Session> {
        self.manager
            .on_login_success(domain, session_id, access_token, meta)
            .await
    }

    /// Inbound from the request layer: resolve a token for an
    /// authenticated request.
    pub async fn resolve_token(
        &self,
        domain: &str,
        session_id: Option<&str>,
    ) -> SessionResult<String> {
        self.resolver.resolve_token(domain, session_id).await
    }

    /// Inbound from the request layer: schedule a heartbeat for a
    /// recognized session.
    pub fn touch(&self, session_id: &str) {
        self.heartbeat.touch(session_id);
    }

    /// Admin surface: active sessions for a tenant, newest first.
    pub async fn list_active_sessions(&self, domain: &str) -> SessionResult<Vec<Session>> {
        self.manager.list_active_sessions(domain).await
    }

    /// Admin surface: terminate one session.
    pub async fn terminate_session(&self, domain: &str, session_id: &str) -> SessionResult<()> {
        self.manager.remove_session(domain, session_id).await
    }

    /// Admin surface: terminate everything except one session.
    pub async fn terminate_other_sessions(
        &self,
        domain: &str,
        keep_session_id: &str,
    ) -> SessionResult<u64> {
        self.manager
            .terminate_other_sessions(domain, keep_session_id)
            .await
    }

    /// Admin surface: log the tenant out everywhere.
    pub async fn remove_all_sessions(&self, domain: &str) -> SessionResult<u64> {
        self.manager.remove_all_sessions(domain).await
    }

    /// Admin surface: disconnect the tenant entirely.
    pub async fn disconnect(&self, domain: &str) -> SessionResult<bool> {
        self.manager.disconnect(domain).await
    }

    /// Payload for the health endpoint.
    #[must_use]
    pub fn cache_health(&self) -> CacheHealth {
        self.health.snapshot()
    }

    /// Direct access to the lifecycle manager, for callers that need the
    /// finer-grained operations.
    #[must_use]
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Stops the background tasks and waits for them to drain.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let Self {
            resolver,
            manager,
            health,
            heartbeat,
            shutdown: _signal,
            tasks,
        } = self;
        // The heartbeat worker drains until every sender is gone; the
        // resolver holds a cloned sender, so both must drop before the
        // worker task is awaited.
        drop(heartbeat);
        drop(resolver);
        drop(manager);
        drop(health);
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task panicked during shutdown");
            }
        }
    }
}
