//! Session storage operations.
//!
//! Every read and conditional update re-checks `is_active` in SQL, so a
//! resolution racing a sweep or an eviction observes the deactivation.
//! Deactivations are idempotent: the `AND is_active` guard makes a repeat
//! call affect zero rows.

use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use time::OffsetDateTime;
use tracing::{info, instrument};
use uuid::Uuid;

use shopmirror_session::{EvictedSession, RequestMeta, Session, SessionResult, SessionStore};

use crate::{PostgresSessionStore, store_err};

/// Session row shape: `id, tenant_id, access_token, created_at,
/// last_accessed_at, expires_at, is_active, ip_address, user_agent`.
pub(crate) type SessionTuple = (
    String,
    Uuid,
    String,
    OffsetDateTime,
    OffsetDateTime,
    Option<OffsetDateTime>,
    bool,
    Option<String>,
    Option<String>,
);

pub(crate) fn session_from_tuple(row: SessionTuple) -> Session {
    Session {
        id: row.0,
        tenant_id: row.1,
        access_token: row.2,
        created_at: row.3,
        last_accessed_at: row.4,
        expires_at: row.5,
        is_active: row.6,
        ip_address: row.7,
        user_agent: row.8,
    }
}

const SESSION_COLUMNS: &str = "id, tenant_id, access_token, created_at, last_accessed_at, \
                               expires_at, is_active, ip_address, user_agent";

#[async_trait]
impl SessionStore for PostgresSessionStore {
    #[instrument(skip(self))]
    async fn find_session(
        &self,
        tenant_id: Uuid,
        session_id: &str,
    ) -> SessionResult<Option<Session>> {
        let row: Option<SessionTuple> = query_as(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM sessions
            WHERE tenant_id = $1 AND id = $2
            "#
        ))
        .bind(tenant_id)
        .bind(session_id)
        .fetch_optional(self.pool())
        .await
        .map_err(store_err)?;

        Ok(row.map(session_from_tuple))
    }

    #[instrument(skip(self))]
    async fn find_active_session(
        &self,
        tenant_id: Uuid,
        session_id: &str,
    ) -> SessionResult<Option<Session>> {
        let row: Option<SessionTuple> = query_as(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM sessions
            WHERE tenant_id = $1 AND id = $2 AND is_active
            "#
        ))
        .bind(tenant_id)
        .bind(session_id)
        .fetch_optional(self.pool())
        .await
        .map_err(store_err)?;

        Ok(row.map(session_from_tuple))
    }

    #[instrument(skip(self))]
    async fn find_most_recent_active(&self, tenant_id: Uuid) -> SessionResult<Option<Session>> {
        let row: Option<SessionTuple> = query_as(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM sessions
            WHERE tenant_id = $1 AND is_active
            ORDER BY last_accessed_at DESC
            LIMIT 1
            "#
        ))
        .bind(tenant_id)
        .fetch_optional(self.pool())
        .await
        .map_err(store_err)?;

        Ok(row.map(session_from_tuple))
    }

    #[instrument(skip(self, access_token, meta))]
    async fn upsert_session(
        &self,
        tenant_id: Uuid,
        session_id: &str,
        access_token: &str,
        expires_at: OffsetDateTime,
        meta: &RequestMeta,
    ) -> SessionResult<Session> {
        // Re-login keeps created_at and the original request metadata;
        // only the token, expiry and activity state refresh.
        let row: SessionTuple = query_as(&format!(
            r#"
            INSERT INTO sessions (tenant_id, id, access_token, expires_at, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tenant_id, id) DO UPDATE SET
                access_token = EXCLUDED.access_token,
                expires_at = EXCLUDED.expires_at,
                last_accessed_at = NOW(),
                is_active = TRUE
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(tenant_id)
        .bind(session_id)
        .bind(access_token)
        .bind(expires_at)
        .bind(meta.ip_address.as_deref())
        .bind(meta.user_agent.as_deref())
        .fetch_one(self.pool())
        .await
        .map_err(store_err)?;

        Ok(session_from_tuple(row))
    }

    #[instrument(skip(self))]
    async fn list_active(&self, tenant_id: Uuid) -> SessionResult<Vec<Session>> {
        let rows: Vec<SessionTuple> = query_as(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM sessions
            WHERE tenant_id = $1 AND is_active
            ORDER BY last_accessed_at DESC
            "#
        ))
        .bind(tenant_id)
        .fetch_all(self.pool())
        .await
        .map_err(store_err)?;

        Ok(rows.into_iter().map(session_from_tuple).collect())
    }

    #[instrument(skip(self))]
    async fn count_active(&self, tenant_id: Uuid) -> SessionResult<u64> {
        let count = query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM sessions
            WHERE tenant_id = $1 AND is_active
            "#,
        )
        .bind(tenant_id)
        .fetch_one(self.pool())
        .await
        .map_err(store_err)?;

        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self))]
    async fn deactivate_session(&self, tenant_id: Uuid, session_id: &str) -> SessionResult<bool> {
        let rows_affected = query(
            r#"
            UPDATE sessions
            SET is_active = FALSE
            WHERE tenant_id = $1 AND id = $2 AND is_active
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .execute(self.pool())
        .await
        .map_err(store_err)?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    #[instrument(skip(self))]
    async fn deactivate_all(&self, tenant_id: Uuid) -> SessionResult<u64> {
        let rows_affected = query(
            r#"
            UPDATE sessions
            SET is_active = FALSE
            WHERE tenant_id = $1 AND is_active
            "#,
        )
        .bind(tenant_id)
        .execute(self.pool())
        .await
        .map_err(store_err)?
        .rows_affected();

        if rows_affected > 0 {
            info!(
                tenant_id = %tenant_id,
                count = rows_affected,
                "Deactivated all sessions for tenant"
            );
        }

        Ok(rows_affected)
    }

    #[instrument(skip(self, session_ids), fields(count = session_ids.len()))]
    async fn touch_sessions(
        &self,
        session_ids: &[String],
        now: OffsetDateTime,
    ) -> SessionResult<()> {
        if session_ids.is_empty() {
            return Ok(());
        }

        query(
            r#"
            UPDATE sessions
            SET last_accessed_at = $1
            WHERE id = ANY($2) AND is_active
            "#,
        )
        .bind(now)
        .bind(session_ids)
        .execute(self.pool())
        .await
        .map_err(store_err)?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn deactivate_expired(
        &self,
        now: OffsetDateTime,
        batch: u32,
    ) -> SessionResult<Vec<EvictedSession>> {
        // The bounded subquery keeps lock scope small on a large backlog;
        // callers loop until a short batch comes back.
        let rows: Vec<(String, String)> = query_as(
            r#"
            UPDATE sessions s
            SET is_active = FALSE
            FROM tenants t
            WHERE s.tenant_id = t.id
              AND (s.tenant_id, s.id) IN (
                  SELECT tenant_id, id
                  FROM sessions
                  WHERE is_active
                    AND expires_at IS NOT NULL
                    AND expires_at <= $1
                  LIMIT $2
              )
            RETURNING t.domain, s.id
            "#,
        )
        .bind(now)
        .bind(i64::from(batch))
        .fetch_all(self.pool())
        .await
        .map_err(store_err)?;

        Ok(rows
            .into_iter()
            .map(|(domain, session_id)| EvictedSession { domain, session_id })
            .collect())
    }

    #[instrument(skip(self))]
    async fn deactivate_inactive(&self, cutoff: OffsetDateTime) -> SessionResult<u64> {
        let rows_affected = query(
            r#"
            UPDATE sessions
            SET is_active = FALSE
            WHERE is_active AND last_accessed_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(self.pool())
        .await
        .map_err(store_err)?
        .rows_affected();

        Ok(rows_affected)
    }

    #[instrument(skip(self))]
    async fn delete_inactive(&self, cutoff: OffsetDateTime) -> SessionResult<u64> {
        let rows_affected = query(
            r#"
            DELETE FROM sessions
            WHERE last_accessed_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(self.pool())
        .await
        .map_err(store_err)?
        .rows_affected();

        if rows_affected > 0 {
            info!(count = rows_affected, "Hard-deleted inactive sessions");
        }

        Ok(rows_affected)
    }
}
