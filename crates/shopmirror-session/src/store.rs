//! Durable session store traits.
//!
//! The durable store is the single source of truth for tenants and
//! sessions. The volatile cache tier is strictly a performance overlay on
//! top of these traits.
//!
//! # Implementation Notes
//!
//! Implementations should:
//!
//! - Re-check `is_active` inside every read and conditional update, so a
//!   resolution racing a garbage-collection sweep observes a miss rather
//!   than a stale session
//! - Make deactivations idempotent (a second call is a no-op, not an error)
//! - Bound sweep batches where the backend supports it, to avoid long-held
//!   locks on large result sets
//!
//! A PostgreSQL implementation is provided in the
//! `shopmirror-session-postgres` crate.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::SessionResult;
use crate::model::{EvictedSession, RequestMeta, Session, Tenant};

/// Storage trait for tenant records.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Finds a tenant by its domain.
    async fn find_tenant_by_domain(&self, domain: &str) -> SessionResult<Option<Tenant>>;

    /// Creates the tenant for `domain` if it does not exist, otherwise
    /// refreshes its `primary_access_token`. Idempotent; called on every
    /// successful login.
    async fn upsert_tenant(&self, domain: &str, access_token: &str) -> SessionResult<Tenant>;

    /// Deletes a tenant and cascades to all of its sessions. Used only by
    /// the explicit disconnect operation.
    ///
    /// Returns `true` if a tenant was deleted.
    async fn delete_tenant(&self, domain: &str) -> SessionResult<bool>;
}

/// Storage trait for session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Finds a session by `(tenant_id, session_id)` regardless of state.
    ///
    /// Resolution needs the distinction between "never seen" (fall back to
    /// a tenant-scoped token) and "deactivated" (the caller must
    /// re-authenticate).
    async fn find_session(
        &self,
        tenant_id: Uuid,
        session_id: &str,
    ) -> SessionResult<Option<Session>>;

    /// Finds an **active** session by `(tenant_id, session_id)`.
    ///
    /// The `is_active` check happens at read time; callers must not trust
    /// a cached "active" assumption.
    async fn find_active_session(
        &self,
        tenant_id: Uuid,
        session_id: &str,
    ) -> SessionResult<Option<Session>>;

    /// Finds the most recently accessed active session of a tenant,
    /// regardless of session ID. Fallback path for requests that carry no
    /// usable session.
    async fn find_most_recent_active(&self, tenant_id: Uuid) -> SessionResult<Option<Session>>;

    /// Upserts a session by `(tenant_id, session_id)`.
    ///
    /// On insert, `meta` is captured. On update, the access token and
    /// `last_accessed_at` are refreshed; `ip_address`/`user_agent` keep
    /// their original values. `expires_at` is set on every call.
    async fn upsert_session(
        &self,
        tenant_id: Uuid,
        session_id: &str,
        access_token: &str,
        expires_at: OffsetDateTime,
        meta: &RequestMeta,
    ) -> SessionResult<Session>;

    /// Lists active sessions for a tenant, ordered by `last_accessed_at`
    /// descending (newest first).
    async fn list_active(&self, tenant_id: Uuid) -> SessionResult<Vec<Session>>;

    /// Counts active sessions for a tenant. Used by the cap check.
    async fn count_active(&self, tenant_id: Uuid) -> SessionResult<u64>;

    /// Deactivates one session (soft delete). Idempotent.
    ///
    /// Returns `true` if the session was active before the call.
    async fn deactivate_session(&self, tenant_id: Uuid, session_id: &str) -> SessionResult<bool>;

    /// Deactivates every session of a tenant (logout-everywhere).
    ///
    /// Returns the number of sessions deactivated.
    async fn deactivate_all(&self, tenant_id: Uuid) -> SessionResult<u64>;

    /// Sets `last_accessed_at = now` for the given sessions. Batched
    /// heartbeat write; unknown IDs are skipped.
    async fn touch_sessions(&self, session_ids: &[String], now: OffsetDateTime)
    -> SessionResult<()>;

    /// Deactivates up to `batch` active sessions whose `expires_at` has
    /// passed, returning the `(domain, session_id)` pairs so callers can
    /// purge the matching cache entries.
    async fn deactivate_expired(
        &self,
        now: OffsetDateTime,
        batch: u32,
    ) -> SessionResult<Vec<EvictedSession>>;

    /// Deactivates active sessions whose `last_accessed_at` is older than
    /// `cutoff`. Returns the number deactivated.
    async fn deactivate_inactive(&self, cutoff: OffsetDateTime) -> SessionResult<u64>;

    /// Hard-deletes sessions (active or not) whose `last_accessed_at` is
    /// older than `cutoff`, to bound storage growth. Returns the number
    /// deleted.
    async fn delete_inactive(&self, cutoff: OffsetDateTime) -> SessionResult<u64>;
}
