//! PostgreSQL storage backend for shopmirror-session
//!
//! Implements the `TenantStore` and `SessionStore` traits over two plain
//! tables:
//!
//! - `tenants` — one row per connected shop, keyed by UUID with a unique
//!   domain and the primary access token from the most recent OAuth grant
//! - `sessions` — one row per login session, keyed by `(tenant_id, id)`
//!   with an `ON DELETE CASCADE` back to the tenant
//!
//! Sessions are soft-deleted via `is_active`; only the inactive-session
//! reaper issues hard `DELETE`s. Tables are created at bootstrap by
//! [`PostgresSessionStore::create_tables_if_not_exists`].
//!
//! # Example
//!
//! ```ignore
//! use shopmirror_session_postgres::PostgresSessionStore;
//!
//! let store = PostgresSessionStore::connect("postgres://localhost/shopmirror").await?;
//! store.create_tables_if_not_exists().await?;
//! ```

pub mod session;
pub mod tenant;

use std::sync::Arc;

use sqlx_core::pool::Pool;
use sqlx_core::query::query;
use sqlx_postgres::Postgres;
use tracing::{info, instrument};

use shopmirror_session::{SessionError, SessionResult};

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

/// Converts a database error into the storage-failure variant the session
/// layer understands.
pub(crate) fn store_err(e: sqlx_core::Error) -> SessionError {
    SessionError::store(e.to_string())
}

/// PostgreSQL-backed durable store for tenants and sessions.
///
/// Holds a connection pool; cheap to clone and share.
#[derive(Debug, Clone)]
pub struct PostgresSessionStore {
    pool: Arc<PgPool>,
}

impl PostgresSessionStore {
    /// Create new storage with an existing connection pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create new storage by connecting to the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(database_url: &str) -> SessionResult<Self> {
        use sqlx_core::pool::PoolOptions;
        let pool = PoolOptions::<Postgres>::new()
            .connect(database_url)
            .await
            .map_err(store_err)?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get a reference to the Arc-wrapped pool.
    #[must_use]
    pub fn pool_arc(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }

    /// Create the tenant and session tables.
    /// Should be called during server bootstrap.
    #[instrument(skip(self))]
    pub async fn create_tables_if_not_exists(&self) -> SessionResult<()> {
        query(
            r#"
            CREATE TABLE IF NOT EXISTS tenants (
                id UUID PRIMARY KEY,
                domain TEXT UNIQUE NOT NULL,
                primary_access_token TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(self.pool())
        .await
        .map_err(store_err)?;

        query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                tenant_id UUID NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                id TEXT NOT NULL,
                access_token TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                last_accessed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                expires_at TIMESTAMPTZ,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                ip_address TEXT,
                user_agent TEXT,
                PRIMARY KEY (tenant_id, id)
            )
            "#,
        )
        .execute(self.pool())
        .await
        .map_err(store_err)?;

        // Create index for the active-session listings and counts
        query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sessions_tenant_active
            ON sessions(tenant_id, last_accessed_at DESC)
            WHERE is_active
            "#,
        )
        .execute(self.pool())
        .await
        .map_err(store_err)?;

        // Create index for the expired-session sweep
        query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sessions_expires_at
            ON sessions(expires_at)
            WHERE is_active AND expires_at IS NOT NULL
            "#,
        )
        .execute(self.pool())
        .await
        .map_err(store_err)?;

        // Create index for the inactivity sweep and hard-delete cutoff
        query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sessions_last_accessed_at
            ON sessions(last_accessed_at)
            "#,
        )
        .execute(self.pool())
        .await
        .map_err(store_err)?;

        info!("Session storage tables created");

        Ok(())
    }
}
