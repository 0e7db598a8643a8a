//! Core data model: tenants and sessions.
//!
//! Both types are plain structs referenced by ID. The durable store owns
//! them; nothing here holds an object graph back-reference.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A store identity (a connected Shopify shop).
///
/// Created idempotently on the first successful authentication for a
/// domain. Deleted only by an explicit disconnect, which cascades to all
/// of the tenant's sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Stable identifier.
    pub id: Uuid,
    /// Unique natural key used by external callers (e.g. `acme.myshopify.com`).
    pub domain: String,
    /// Most-recently-issued access token, used as the last-resort fallback
    /// when no session-scoped token can be resolved.
    pub primary_access_token: String,
    /// When the tenant was first connected.
    pub created_at: OffsetDateTime,
    /// When the tenant record was last mutated.
    pub updated_at: OffsetDateTime,
}

/// One authenticated browser/device context for a tenant.
///
/// The session ID is opaque and supplied by the caller's transport layer;
/// it is never generated here. A session's `access_token` may diverge from
/// the tenant's primary token if the shop re-authenticated independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque, caller-supplied session identifier.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Access token bound to this session.
    pub access_token: String,
    /// When the session was first seen.
    pub created_at: OffsetDateTime,
    /// Last request that touched this session (heartbeat target).
    pub last_accessed_at: OffsetDateTime,
    /// Absolute inactivity deadline. `None` means the session is governed
    /// only by the inactive-session sweep.
    pub expires_at: Option<OffsetDateTime>,
    /// Soft-delete flag. Deactivated sessions are invisible to resolution.
    pub is_active: bool,
    /// Client IP captured at login.
    pub ip_address: Option<String>,
    /// Client user agent captured at login.
    pub user_agent: Option<String>,
}

impl Session {
    /// Returns `true` if the session's absolute deadline has passed.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|deadline| deadline < now)
    }
}

/// Request metadata captured when a session is first created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    /// Client IP address.
    pub ip_address: Option<String>,
    /// Client user agent string.
    pub user_agent: Option<String>,
}

impl RequestMeta {
    /// Convenience constructor for callers with both fields at hand.
    #[must_use]
    pub fn new(ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip_address: Some(ip_address.into()),
            user_agent: Some(user_agent.into()),
        }
    }
}

/// A session deactivated by a sweep or cap enforcement, identified by the
/// pair the cache keys are derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedSession {
    /// Tenant domain (cache key component).
    pub domain: String,
    /// Session identifier (cache key component).
    pub session_id: String,
}
