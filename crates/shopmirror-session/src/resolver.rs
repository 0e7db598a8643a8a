//! Tiered access-token resolution.
//!
//! Given `(tenant domain, optional session id)`, walks
//! cache → store-by-session → tenant-scoped cache → store-most-recent →
//! tenant primary token, populating the cache on the way back up.
//!
//! The ordering trades a small chance of returning a *different* session's
//! token (the tenant-scoped tiers) for availability: the upstream API call
//! the token feeds is tenant-scoped, so "some valid token for this tenant"
//! beats a hard failure. The one hard stop: a session the store knows but
//! has deactivated (evicted, expired, logged out) resolves to
//! `NotAuthenticated` so the client re-authenticates instead of silently
//! riding another session's token.
//!
//! Durable-store errors propagate; cache errors are absorbed by the
//! health monitor and never escape this component.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use crate::cache::CacheKeys;
use crate::error::{SessionError, SessionResult};
use crate::health::CacheHealthMonitor;
use crate::heartbeat::HeartbeatUpdater;
use crate::model::Tenant;
use crate::store::{SessionStore, TenantStore};

/// Resolves access tokens for authenticated requests.
pub struct TokenResolver {
    tenants: Arc<dyn TenantStore>,
    sessions: Arc<dyn SessionStore>,
    cache: Arc<CacheHealthMonitor>,
    heartbeat: HeartbeatUpdater,
    token_ttl: Duration,
}

impl TokenResolver {
    /// Creates a resolver over the given tiers.
    #[must_use]
    pub fn new(
        tenants: Arc<dyn TenantStore>,
        sessions: Arc<dyn SessionStore>,
        cache: Arc<CacheHealthMonitor>,
        heartbeat: HeartbeatUpdater,
        token_ttl: Duration,
    ) -> Self {
        Self {
            tenants,
            sessions,
            cache,
            heartbeat,
            token_ttl,
        }
    }

    /// Resolves an access token for `domain`, preferring the session-scoped
    /// tiers when `session_id` is supplied.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotAuthenticated`] when no token exists for
    /// the tenant, and [`SessionError::Store`] when the durable store
    /// fails. Volatile-tier failures never surface here.
    pub async fn resolve_token(
        &self,
        domain: &str,
        session_id: Option<&str>,
    ) -> SessionResult<String> {
        if let Some(session_id) = session_id {
            // 1. Session-scoped cache. A hit skips the store entirely; the
            // heartbeat keeps last_accessed_at fresh off the hot path.
            let session_key = CacheKeys::session(domain, session_id);
            if let Some(token) = self.cache.get(&session_key).await {
                tracing::debug!(domain = %domain, session_id = %session_id, "token hit (session cache)");
                self.heartbeat.touch(session_id);
                return Ok(token);
            }

            // 2. Durable store by session. is_active is re-checked at
            // read time, so a resolution racing a sweep or an eviction
            // sees the deactivation, not a stale "active" assumption.
            let tenant = self.tenants.find_tenant_by_domain(domain).await?;
            if let Some(tenant) = &tenant {
                match self.sessions.find_session(tenant.id, session_id).await? {
                    Some(session) if session.is_active => {
                        tracing::debug!(domain = %domain, session_id = %session_id, "token hit (store, session)");
                        self.sessions
                            .touch_sessions(
                                std::slice::from_ref(&session.id),
                                OffsetDateTime::now_utc(),
                            )
                            .await?;
                        self.write_through(domain, Some(session_id), &session.access_token)
                            .await;
                        return Ok(session.access_token);
                    }
                    Some(_) => {
                        // Known but deactivated (evicted, expired or
                        // logged out): the caller re-authenticates. The
                        // tenant-scoped fallbacks are reserved for
                        // sessions the store has no record of.
                        tracing::debug!(domain = %domain, session_id = %session_id, "session deactivated, re-auth required");
                        return Err(SessionError::not_authenticated(domain));
                    }
                    None => {}
                }
            }
            return self.resolve_tenant_scoped(domain, tenant).await;
        }

        let tenant = self.tenants.find_tenant_by_domain(domain).await?;
        self.resolve_tenant_scoped(domain, tenant).await
    }

    /// Steps 3–6: tenant-scoped fallbacks for requests without a matching
    /// session.
    async fn resolve_tenant_scoped(
        &self,
        domain: &str,
        tenant: Option<Tenant>,
    ) -> SessionResult<String> {
        // 3. Tenant-scoped cache. No heartbeat: no specific session was
        // matched.
        let tenant_key = CacheKeys::tenant(domain);
        if let Some(token) = self.cache.get(&tenant_key).await {
            tracing::debug!(domain = %domain, "token hit (tenant cache)");
            return Ok(token);
        }

        let Some(tenant) = tenant else {
            return Err(SessionError::not_authenticated(domain));
        };

        // 4. Most recently accessed active session, any session id.
        if let Some(session) = self.sessions.find_most_recent_active(tenant.id).await? {
            tracing::debug!(domain = %domain, session_id = %session.id, "token hit (store, most recent)");
            self.sessions
                .touch_sessions(std::slice::from_ref(&session.id), OffsetDateTime::now_utc())
                .await?;
            self.write_through(domain, None, &session.access_token).await;
            return Ok(session.access_token);
        }

        // 5. Tenant primary token, the last resort.
        if !tenant.primary_access_token.is_empty() {
            tracing::debug!(domain = %domain, "token hit (tenant primary)");
            self.write_through(domain, None, &tenant.primary_access_token)
                .await;
            return Ok(tenant.primary_access_token);
        }

        // 6. Nothing left.
        Err(SessionError::not_authenticated(domain))
    }

    /// Populates the cache on the way back up. The tenant-scoped key always
    /// tracks the most-recently-cached token for the tenant.
    async fn write_through(&self, domain: &str, session_id: Option<&str>, token: &str) {
        if let Some(session_id) = session_id {
            self.cache
                .set(&CacheKeys::session(domain, session_id), token, self.token_ttl)
                .await;
        }
        self.cache
            .set(&CacheKeys::tenant(domain), token, self.token_ttl)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{LocalTokenCache, TokenCache};
    use crate::config::HealthConfig;
    use crate::memory::MemorySessionStore;
    use crate::model::RequestMeta;

    struct Fixture {
        store: Arc<MemorySessionStore>,
        cache: Arc<LocalTokenCache>,
        resolver: TokenResolver,
        _worker: tokio::task::JoinHandle<()>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemorySessionStore::new());
        let cache = Arc::new(LocalTokenCache::new());
        let monitor = Arc::new(CacheHealthMonitor::new(
            cache.clone(),
            HealthConfig::default(),
        ));
        let (heartbeat, worker) =
            HeartbeatUpdater::spawn(store.clone(), Duration::from_secs(3));
        let resolver = TokenResolver::new(
            store.clone(),
            store.clone(),
            monitor,
            heartbeat,
            Duration::from_secs(3600),
        );
        Fixture {
            store,
            cache,
            resolver,
            _worker: worker,
        }
    }

    async fn login(f: &Fixture, domain: &str, session_id: &str, token: &str) {
        let tenant = f.store.upsert_tenant(domain, token).await.unwrap();
        f.store
            .upsert_session(
                tenant.id,
                session_id,
                token,
                OffsetDateTime::now_utc() + time::Duration::hours(4),
                &RequestMeta::default(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_domain_is_not_authenticated() {
        let f = fixture();
        let err = f
            .resolver
            .resolve_token("ghost.myshopify.com", Some("s1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotAuthenticated { .. }));

        let err = f
            .resolver
            .resolve_token("ghost.myshopify.com", None)
            .await
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_session_store_hit_writes_both_key_shapes() {
        let f = fixture();
        login(&f, "acme.myshopify.com", "s1", "shpat_s1").await;

        let token = f
            .resolver
            .resolve_token("acme.myshopify.com", Some("s1"))
            .await
            .unwrap();
        assert_eq!(token, "shpat_s1");

        let session_key = CacheKeys::session("acme.myshopify.com", "s1");
        let tenant_key = CacheKeys::tenant("acme.myshopify.com");
        assert_eq!(f.cache.get(&session_key).await.unwrap(), Some(token.clone()));
        assert_eq!(f.cache.get(&tenant_key).await.unwrap(), Some(token));
    }

    #[tokio::test]
    async fn test_unknown_session_falls_back_to_most_recent() {
        let f = fixture();
        login(&f, "acme.myshopify.com", "s1", "shpat_s1").await;

        // A session id the store has never seen still yields a tenant token.
        let token = f
            .resolver
            .resolve_token("acme.myshopify.com", Some("evicted"))
            .await
            .unwrap();
        assert_eq!(token, "shpat_s1");

        // Only the tenant-scoped key was populated for the unmatched id.
        let stray_key = CacheKeys::session("acme.myshopify.com", "evicted");
        assert_eq!(f.cache.get(&stray_key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_deactivated_session_requires_reauth() {
        let f = fixture();
        login(&f, "acme.myshopify.com", "s1", "shpat_s1").await;
        login(&f, "acme.myshopify.com", "s2", "shpat_s2").await;

        let tenant = f
            .store
            .find_tenant_by_domain("acme.myshopify.com")
            .await
            .unwrap()
            .unwrap();
        f.store.deactivate_session(tenant.id, "s1").await.unwrap();

        // s2 is still active, but the deactivated s1 must not ride it.
        let err = f
            .resolver
            .resolve_token("acme.myshopify.com", Some("s1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotAuthenticated { .. }));

        let token = f
            .resolver
            .resolve_token("acme.myshopify.com", Some("s2"))
            .await
            .unwrap();
        assert_eq!(token, "shpat_s2");
    }

    #[tokio::test]
    async fn test_primary_token_is_last_resort() {
        let f = fixture();
        // Tenant exists but has no sessions at all.
        f.store
            .upsert_tenant("acme.myshopify.com", "shpat_primary")
            .await
            .unwrap();

        let token = f
            .resolver
            .resolve_token("acme.myshopify.com", None)
            .await
            .unwrap();
        assert_eq!(token, "shpat_primary");
    }

    #[tokio::test]
    async fn test_no_session_id_starts_at_tenant_cache() {
        let f = fixture();
        f.cache
            .set(
                &CacheKeys::tenant("acme.myshopify.com"),
                "shpat_cached",
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        // No tenant in the store; the cached tenant token still serves.
        let token = f
            .resolver
            .resolve_token("acme.myshopify.com", None)
            .await
            .unwrap();
        assert_eq!(token, "shpat_cached");
    }
}
