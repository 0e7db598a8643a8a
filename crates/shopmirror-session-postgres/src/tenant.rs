//! Tenant storage operations.

use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;
use tracing::{info, instrument};
use uuid::Uuid;

use shopmirror_session::{SessionResult, Tenant, TenantStore};

use crate::{PostgresSessionStore, store_err};

/// Tenant row shape: `id, domain, primary_access_token, created_at,
/// updated_at`.
pub(crate) type TenantTuple = (Uuid, String, String, OffsetDateTime, OffsetDateTime);

pub(crate) fn tenant_from_tuple(row: TenantTuple) -> Tenant {
    Tenant {
        id: row.0,
        domain: row.1,
        primary_access_token: row.2,
        created_at: row.3,
        updated_at: row.4,
    }
}

#[async_trait]
impl TenantStore for PostgresSessionStore {
    #[instrument(skip(self))]
    async fn find_tenant_by_domain(&self, domain: &str) -> SessionResult<Option<Tenant>> {
        let row: Option<TenantTuple> = query_as(
            r#"
            SELECT id, domain, primary_access_token, created_at, updated_at
            FROM tenants
            WHERE domain = $1
            "#,
        )
        .bind(domain)
        .fetch_optional(self.pool())
        .await
        .map_err(store_err)?;

        Ok(row.map(tenant_from_tuple))
    }

    #[instrument(skip(self, access_token))]
    async fn upsert_tenant(&self, domain: &str, access_token: &str) -> SessionResult<Tenant> {
        // The generated UUID only matters on insert; a conflicting row
        // keeps its existing identity.
        let row: TenantTuple = query_as(
            r#"
            INSERT INTO tenants (id, domain, primary_access_token)
            VALUES ($1, $2, $3)
            ON CONFLICT (domain) DO UPDATE SET
                primary_access_token = EXCLUDED.primary_access_token,
                updated_at = NOW()
            RETURNING id, domain, primary_access_token, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(domain)
        .bind(access_token)
        .fetch_one(self.pool())
        .await
        .map_err(store_err)?;

        Ok(tenant_from_tuple(row))
    }

    #[instrument(skip(self))]
    async fn delete_tenant(&self, domain: &str) -> SessionResult<bool> {
        let rows_affected = query(
            r#"
            DELETE FROM tenants
            WHERE domain = $1
            "#,
        )
        .bind(domain)
        .execute(self.pool())
        .await
        .map_err(store_err)?
        .rows_affected();

        if rows_affected > 0 {
            info!(domain = %domain, "Deleted tenant and cascaded sessions");
        }

        Ok(rows_affected > 0)
    }
}
