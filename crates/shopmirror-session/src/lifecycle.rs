//! Session lifecycle management.
//!
//! Login upserts, per-tenant session-cap enforcement, termination paths
//! (single session, everything-but-one, logout-everywhere, disconnect) and
//! read-only introspection.
//!
//! The durable store is authoritative throughout: a failed cache purge
//! after a deactivation is logged and swallowed, never surfaced. Tenant
//! ownership is enforced here by scoping every operation to a domain;
//! "which session is mine" policy belongs to the caller boundary.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::task::JoinHandle;

use crate::cache::CacheKeys;
use crate::config::SessionCacheConfig;
use crate::error::SessionResult;
use crate::health::CacheHealthMonitor;
use crate::model::{RequestMeta, Session};
use crate::store::{SessionStore, TenantStore};

/// Creates, caps, terminates and inspects sessions.
pub struct SessionManager {
    tenants: Arc<dyn TenantStore>,
    sessions: Arc<dyn SessionStore>,
    cache: Arc<CacheHealthMonitor>,
    config: SessionCacheConfig,
}

impl SessionManager {
    /// Creates a manager over the given tiers.
    #[must_use]
    pub fn new(
        tenants: Arc<dyn TenantStore>,
        sessions: Arc<dyn SessionStore>,
        cache: Arc<CacheHealthMonitor>,
        config: SessionCacheConfig,
    ) -> Self {
        Self {
            tenants,
            sessions,
            cache,
            config,
        }
    }

    /// Entry point for the auth collaborator: upserts tenant and session,
    /// then enforces the session cap off the login's critical path.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::SessionError::Store`] if the durable store
    /// rejects the upsert. The spawned cap enforcement never fails the
    /// login.
    pub async fn on_login_success(
        self: &Arc<Self>,
        domain: &str,
        session_id: &str,
        access_token: &str,
        meta: RequestMeta,
    ) -> SessionResult<Session> {
        let session = self
            .create_or_update_session(domain, session_id, access_token, &meta)
            .await?;
        self.clone().spawn_enforce_session_cap(domain.to_string());
        Ok(session)
    }

    /// Upserts the tenant (refreshing its primary token) and the session.
    ///
    /// On insert the request metadata is captured; on update the access
    /// token and `last_accessed_at` refresh. `expires_at` moves to
    /// `now + inactivity_window` on every call.
    pub async fn create_or_update_session(
        &self,
        domain: &str,
        session_id: &str,
        access_token: &str,
        meta: &RequestMeta,
    ) -> SessionResult<Session> {
        let tenant = self.tenants.upsert_tenant(domain, access_token).await?;
        let expires_at = OffsetDateTime::now_utc() + self.config.inactivity_window;
        let session = self
            .sessions
            .upsert_session(tenant.id, session_id, access_token, expires_at, meta)
            .await?;

        tracing::info!(
            domain = %domain,
            session_id = %session_id,
            "session upserted on login"
        );
        Ok(session)
    }

    /// Runs cap enforcement in a background task, bounded by the eviction
    /// timeout. Errors are logged, never raised: overshoot is corrected on
    /// the next pass.
    pub fn spawn_enforce_session_cap(self: Arc<Self>, domain: String) -> JoinHandle<()> {
        tokio::spawn(async move {
            let budget = self.config.eviction_timeout;
            match tokio::time::timeout(budget, self.enforce_session_cap(&domain)).await {
                Ok(Ok(evicted)) if evicted > 0 => {
                    tracing::info!(domain = %domain, evicted = evicted, "session cap enforced");
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(domain = %domain, error = %e, "session cap enforcement failed");
                }
                Err(_) => {
                    tracing::warn!(domain = %domain, "session cap enforcement timed out");
                }
            }
        })
    }

    /// Deactivates the oldest sessions beyond the per-tenant cap and
    /// invalidates their cache entries. Returns the number evicted.
    ///
    /// Runs after the login upsert, so the active listing already contains
    /// the new session: the newest `max_sessions_per_tenant` survive.
    /// No cross-tenant lock is taken; a brief overshoot during concurrent
    /// logins is corrected on the next pass.
    pub async fn enforce_session_cap(&self, domain: &str) -> SessionResult<usize> {
        let Some(tenant) = self.tenants.find_tenant_by_domain(domain).await? else {
            return Ok(0);
        };

        // Cheap count first; most logins are nowhere near the cap and skip
        // the full listing.
        let count = self.sessions.count_active(tenant.id).await?;
        if count <= self.config.max_sessions_per_tenant as u64 {
            return Ok(0);
        }

        let active = self.sessions.list_active(tenant.id).await?;
        if active.len() <= self.config.max_sessions_per_tenant {
            return Ok(0);
        }

        let excess = &active[self.config.max_sessions_per_tenant..];
        let mut evicted = 0;
        for session in excess {
            if self
                .sessions
                .deactivate_session(tenant.id, &session.id)
                .await?
            {
                evicted += 1;
                tracing::info!(
                    domain = %domain,
                    session_id = %session.id,
                    "session evicted by cap enforcement"
                );
            }
            self.cache
                .delete(&CacheKeys::session(domain, &session.id))
                .await;
        }
        Ok(evicted)
    }

    /// Deactivates one session and drops its cache entry. Idempotent: a
    /// second call is a no-op, not an error.
    pub async fn remove_session(&self, domain: &str, session_id: &str) -> SessionResult<()> {
        let Some(tenant) = self.tenants.find_tenant_by_domain(domain).await? else {
            return Ok(());
        };

        let was_active = self.sessions.deactivate_session(tenant.id, session_id).await?;
        // Store deactivation is authoritative; the purge is best-effort.
        self.cache
            .delete(&CacheKeys::session(domain, session_id))
            .await;

        if was_active {
            tracing::info!(domain = %domain, session_id = %session_id, "session removed");
        }
        Ok(())
    }

    /// Deactivates every session of the tenant and purges all of its cache
    /// keys (logout-everywhere). Returns the number deactivated.
    pub async fn remove_all_sessions(&self, domain: &str) -> SessionResult<u64> {
        let Some(tenant) = self.tenants.find_tenant_by_domain(domain).await? else {
            return Ok(0);
        };

        let count = self.sessions.deactivate_all(tenant.id).await?;
        self.purge_tenant_keys(domain).await;

        tracing::info!(domain = %domain, count = count, "all sessions removed");
        Ok(count)
    }

    /// Deactivates every active session except `keep_session_id`. Returns
    /// the number deactivated.
    pub async fn terminate_other_sessions(
        &self,
        domain: &str,
        keep_session_id: &str,
    ) -> SessionResult<u64> {
        let Some(tenant) = self.tenants.find_tenant_by_domain(domain).await? else {
            return Ok(0);
        };

        let mut terminated = 0;
        for session in self.sessions.list_active(tenant.id).await? {
            if session.id == keep_session_id {
                continue;
            }
            if self
                .sessions
                .deactivate_session(tenant.id, &session.id)
                .await?
            {
                terminated += 1;
            }
            self.cache
                .delete(&CacheKeys::session(domain, &session.id))
                .await;
        }

        tracing::info!(domain = %domain, count = terminated, "other sessions terminated");
        Ok(terminated)
    }

    /// Deletes the tenant entirely, cascading to its sessions and purging
    /// every cache key for the domain. Returns `true` if a tenant existed.
    pub async fn disconnect(&self, domain: &str) -> SessionResult<bool> {
        let deleted = self.tenants.delete_tenant(domain).await?;
        self.purge_tenant_keys(domain).await;

        if deleted {
            tracing::info!(domain = %domain, "tenant disconnected");
        }
        Ok(deleted)
    }

    /// Drops every cache key of one tenant: the exact tenant-scoped key
    /// plus the session-scoped prefix. The prefix alone would also match a
    /// domain that merely extends this one.
    async fn purge_tenant_keys(&self, domain: &str) {
        self.cache.delete(&CacheKeys::tenant(domain)).await;
        self.cache
            .purge_prefix(&CacheKeys::tenant_prefix(domain))
            .await;
    }

    /// Active sessions for a tenant, newest first. Unknown domains list
    /// empty rather than failing.
    pub async fn list_active_sessions(&self, domain: &str) -> SessionResult<Vec<Session>> {
        match self.tenants.find_tenant_by_domain(domain).await? {
            Some(tenant) => self.sessions.list_active(tenant.id).await,
            None => Ok(Vec::new()),
        }
    }

    /// Looks up one active session.
    pub async fn get_session(
        &self,
        domain: &str,
        session_id: &str,
    ) -> SessionResult<Option<Session>> {
        match self.tenants.find_tenant_by_domain(domain).await? {
            Some(tenant) => self.sessions.find_active_session(tenant.id, session_id).await,
            None => Ok(None),
        }
    }
}
