//! Session directory and access-token cache for Shopmirror.
//!
//! Keeps per-tenant (shop) OAuth access tokens available with low latency:
//! a tiered resolver walks the volatile cache, then the durable store,
//! then the tenant's primary token; a health-aware circuit breaker decides
//! whether the cache tier is consulted at all; scheduled sweeps and an
//! asynchronous heartbeat keep session state from growing stale.
//!
//! The durable store is the single source of truth. The cache tier may
//! fail, flap or lose entries at any time without affecting correctness,
//! only latency.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use shopmirror_session::{
//!     LocalTokenCache, MemorySessionStore, RequestMeta, SessionCacheConfig,
//!     SessionDirectory,
//! };
//!
//! let store = Arc::new(MemorySessionStore::new());
//! let directory = SessionDirectory::new(
//!     store.clone(),
//!     store,
//!     Arc::new(LocalTokenCache::new()),
//!     SessionCacheConfig::default(),
//! );
//!
//! directory
//!     .on_login_success("acme.myshopify.com", "sess-1", "shpat_abc", RequestMeta::default())
//!     .await?;
//! let token = directory.resolve_token("acme.myshopify.com", Some("sess-1")).await?;
//! ```

pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod gc;
pub mod health;
pub mod heartbeat;
pub mod lifecycle;
pub mod memory;
pub mod model;
pub mod resolver;
pub mod store;

pub use cache::{CacheError, CacheKeys, CacheResult, LocalTokenCache, TokenCache};
pub use config::{GcConfig, HealthConfig, SessionCacheConfig};
pub use directory::SessionDirectory;
pub use error::{SessionError, SessionResult};
pub use gc::SessionGc;
pub use health::{CacheHealth, CacheHealthMonitor};
pub use heartbeat::HeartbeatUpdater;
pub use lifecycle::SessionManager;
pub use memory::MemorySessionStore;
pub use model::{EvictedSession, RequestMeta, Session, Tenant};
pub use resolver::TokenResolver;
pub use store::{SessionStore, TenantStore};
