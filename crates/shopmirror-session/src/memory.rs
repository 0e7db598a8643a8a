//! In-memory durable-store implementation.
//!
//! Implements [`TenantStore`] and [`SessionStore`] over process-local
//! maps. Suitable for tests and single-process setups; production
//! deployments use the PostgreSQL adapter in
//! `shopmirror-session-postgres`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{SessionError, SessionResult};
use crate::model::{EvictedSession, RequestMeta, Session, Tenant};
use crate::store::{SessionStore, TenantStore};

#[derive(Default)]
struct Inner {
    /// Keyed by domain (the natural key external callers use).
    tenants: HashMap<String, Tenant>,
    /// Keyed by `(tenant_id, session_id)`.
    sessions: HashMap<(Uuid, String), Session>,
}

impl Inner {
    fn domain_of(&self, tenant_id: Uuid) -> Option<String> {
        self.tenants
            .values()
            .find(|t| t.id == tenant_id)
            .map(|t| t.domain.clone())
    }
}

/// Process-local store for tenants and sessions.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<Inner>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> SessionResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| SessionError::internal("session store lock poisoned"))
    }

    /// Total number of session records, active or not. Test hook.
    pub fn session_count(&self) -> usize {
        self.inner.lock().map(|i| i.sessions.len()).unwrap_or(0)
    }

    /// Fetches a session regardless of `is_active`. Test hook.
    pub fn raw_session(&self, tenant_id: Uuid, session_id: &str) -> Option<Session> {
        self.inner
            .lock()
            .ok()?
            .sessions
            .get(&(tenant_id, session_id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl TenantStore for MemorySessionStore {
    async fn find_tenant_by_domain(&self, domain: &str) -> SessionResult<Option<Tenant>> {
        Ok(self.lock()?.tenants.get(domain).cloned())
    }

    async fn upsert_tenant(&self, domain: &str, access_token: &str) -> SessionResult<Tenant> {
        let mut inner = self.lock()?;
        let now = OffsetDateTime::now_utc();
        let tenant = inner
            .tenants
            .entry(domain.to_string())
            .and_modify(|t| {
                t.primary_access_token = access_token.to_string();
                t.updated_at = now;
            })
            .or_insert_with(|| Tenant {
                id: Uuid::new_v4(),
                domain: domain.to_string(),
                primary_access_token: access_token.to_string(),
                created_at: now,
                updated_at: now,
            });
        Ok(tenant.clone())
    }

    async fn delete_tenant(&self, domain: &str) -> SessionResult<bool> {
        let mut inner = self.lock()?;
        let Some(tenant) = inner.tenants.remove(domain) else {
            return Ok(false);
        };
        inner.sessions.retain(|(tid, _), _| *tid != tenant.id);
        Ok(true)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn find_session(
        &self,
        tenant_id: Uuid,
        session_id: &str,
    ) -> SessionResult<Option<Session>> {
        Ok(self
            .lock()?
            .sessions
            .get(&(tenant_id, session_id.to_string()))
            .cloned())
    }

    async fn find_active_session(
        &self,
        tenant_id: Uuid,
        session_id: &str,
    ) -> SessionResult<Option<Session>> {
        Ok(self
            .lock()?
            .sessions
            .get(&(tenant_id, session_id.to_string()))
            .filter(|s| s.is_active)
            .cloned())
    }

    async fn find_most_recent_active(&self, tenant_id: Uuid) -> SessionResult<Option<Session>> {
        Ok(self
            .lock()?
            .sessions
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.is_active)
            .max_by_key(|s| s.last_accessed_at)
            .cloned())
    }

    async fn upsert_session(
        &self,
        tenant_id: Uuid,
        session_id: &str,
        access_token: &str,
        expires_at: OffsetDateTime,
        meta: &RequestMeta,
    ) -> SessionResult<Session> {
        let mut inner = self.lock()?;
        let now = OffsetDateTime::now_utc();
        let session = inner
            .sessions
            .entry((tenant_id, session_id.to_string()))
            .and_modify(|s| {
                s.access_token = access_token.to_string();
                s.last_accessed_at = now;
                s.expires_at = Some(expires_at);
                s.is_active = true;
            })
            .or_insert_with(|| Session {
                id: session_id.to_string(),
                tenant_id,
                access_token: access_token.to_string(),
                created_at: now,
                last_accessed_at: now,
                expires_at: Some(expires_at),
                is_active: true,
                ip_address: meta.ip_address.clone(),
                user_agent: meta.user_agent.clone(),
            });
        Ok(session.clone())
    }

    async fn list_active(&self, tenant_id: Uuid) -> SessionResult<Vec<Session>> {
        let inner = self.lock()?;
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.is_active)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
        Ok(sessions)
    }

    async fn count_active(&self, tenant_id: Uuid) -> SessionResult<u64> {
        Ok(self
            .lock()?
            .sessions
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.is_active)
            .count() as u64)
    }

    async fn deactivate_session(&self, tenant_id: Uuid, session_id: &str) -> SessionResult<bool> {
        let mut inner = self.lock()?;
        match inner.sessions.get_mut(&(tenant_id, session_id.to_string())) {
            Some(session) if session.is_active => {
                session.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn deactivate_all(&self, tenant_id: Uuid) -> SessionResult<u64> {
        let mut inner = self.lock()?;
        let mut count = 0;
        for session in inner.sessions.values_mut() {
            if session.tenant_id == tenant_id && session.is_active {
                session.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn touch_sessions(
        &self,
        session_ids: &[String],
        now: OffsetDateTime,
    ) -> SessionResult<()> {
        let mut inner = self.lock()?;
        for session in inner.sessions.values_mut() {
            if session.is_active && session_ids.contains(&session.id) {
                session.last_accessed_at = now;
            }
        }
        Ok(())
    }

    async fn deactivate_expired(
        &self,
        now: OffsetDateTime,
        batch: u32,
    ) -> SessionResult<Vec<EvictedSession>> {
        let mut inner = self.lock()?;
        let expired: Vec<(Uuid, String)> = inner
            .sessions
            .values()
            .filter(|s| s.is_active && s.is_expired(now))
            .take(batch as usize)
            .map(|s| (s.tenant_id, s.id.clone()))
            .collect();

        let mut evicted = Vec::with_capacity(expired.len());
        for (tenant_id, session_id) in expired {
            let domain = inner.domain_of(tenant_id).unwrap_or_default();
            if let Some(session) = inner.sessions.get_mut(&(tenant_id, session_id.clone())) {
                session.is_active = false;
            }
            evicted.push(EvictedSession { domain, session_id });
        }
        Ok(evicted)
    }

    async fn deactivate_inactive(&self, cutoff: OffsetDateTime) -> SessionResult<u64> {
        let mut inner = self.lock()?;
        let mut count = 0;
        for session in inner.sessions.values_mut() {
            if session.is_active && session.last_accessed_at < cutoff {
                session.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_inactive(&self, cutoff: OffsetDateTime) -> SessionResult<u64> {
        let mut inner = self.lock()?;
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| s.last_accessed_at >= cutoff);
        Ok((before - inner.sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn expires() -> OffsetDateTime {
        OffsetDateTime::now_utc() + Duration::hours(4)
    }

    #[tokio::test]
    async fn test_tenant_upsert_is_idempotent() {
        let store = MemorySessionStore::new();
        let first = store.upsert_tenant("acme.myshopify.com", "tok-1").await.unwrap();
        let second = store.upsert_tenant("acme.myshopify.com", "tok-2").await.unwrap();

        assert_eq!(first.id, second.id, "same domain keeps its identity");
        assert_eq!(second.primary_access_token, "tok-2");
    }

    #[tokio::test]
    async fn test_session_upsert_keeps_request_meta() {
        let store = MemorySessionStore::new();
        let tenant = store.upsert_tenant("acme.myshopify.com", "tok").await.unwrap();

        let meta = RequestMeta::new("10.0.0.1", "Mozilla/5.0");
        store
            .upsert_session(tenant.id, "s1", "tok", expires(), &meta)
            .await
            .unwrap();

        // Re-login from a different address: token refreshes, meta doesn't.
        let updated = store
            .upsert_session(tenant.id, "s1", "tok-2", expires(), &RequestMeta::default())
            .await
            .unwrap();
        assert_eq!(updated.access_token, "tok-2");
        assert_eq!(updated.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn test_list_active_orders_newest_first() {
        let store = MemorySessionStore::new();
        let tenant = store.upsert_tenant("acme.myshopify.com", "tok").await.unwrap();
        for id in ["s1", "s2", "s3"] {
            store
                .upsert_session(tenant.id, id, "tok", expires(), &RequestMeta::default())
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        store
            .touch_sessions(&["s1".to_string()], OffsetDateTime::now_utc())
            .await
            .unwrap();

        let listed = store.list_active(tenant.id).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s3", "s2"]);
    }

    #[tokio::test]
    async fn test_count_active_ignores_deactivated() {
        let store = MemorySessionStore::new();
        let tenant = store.upsert_tenant("acme.myshopify.com", "tok").await.unwrap();
        for id in ["s1", "s2", "s3"] {
            store
                .upsert_session(tenant.id, id, "tok", expires(), &RequestMeta::default())
                .await
                .unwrap();
        }
        assert_eq!(store.count_active(tenant.id).await.unwrap(), 3);

        store.deactivate_session(tenant.id, "s2").await.unwrap();
        assert_eq!(store.count_active(tenant.id).await.unwrap(), 2);

        // Other tenants never bleed into the count.
        let other = store.upsert_tenant("b.myshopify.com", "tok").await.unwrap();
        assert_eq!(store.count_active(other.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_tenant_cascades() {
        let store = MemorySessionStore::new();
        let tenant = store.upsert_tenant("acme.myshopify.com", "tok").await.unwrap();
        store
            .upsert_session(tenant.id, "s1", "tok", expires(), &RequestMeta::default())
            .await
            .unwrap();

        assert!(store.delete_tenant("acme.myshopify.com").await.unwrap());
        assert!(!store.delete_tenant("acme.myshopify.com").await.unwrap());
        assert_eq!(store.session_count(), 0);
    }
}
