//! Session cache configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [sessions]
//! max_sessions_per_tenant = 5
//! inactivity_window = "4h"
//! token_ttl = "1h"
//!
//! [sessions.health]
//! probe_interval = "60s"
//! failure_threshold = 3
//!
//! [sessions.gc]
//! expired_sweep_interval = "15m"
//! inactive_sweep_interval = "12h"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the session and token-cache subsystem.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionCacheConfig {
    /// Maximum concurrently active sessions per tenant. Enforcement is
    /// eventually consistent; brief overshoot during concurrent logins is
    /// corrected by the eviction pass.
    pub max_sessions_per_tenant: usize,

    /// Inactivity window applied to `expires_at` on every login/update.
    #[serde(with = "humantime_serde")]
    pub inactivity_window: Duration,

    /// TTL for cached tokens. One policy covers both key shapes
    /// (session-scoped and tenant-scoped).
    #[serde(with = "humantime_serde")]
    pub token_ttl: Duration,

    /// Budget for a single heartbeat flush against the durable store.
    #[serde(with = "humantime_serde")]
    pub heartbeat_timeout: Duration,

    /// Budget for one cap-enforcement eviction pass.
    #[serde(with = "humantime_serde")]
    pub eviction_timeout: Duration,

    /// Volatile-tier health probing.
    pub health: HealthConfig,

    /// Garbage collection sweeps.
    pub gc: GcConfig,
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_tenant: 5,
            inactivity_window: Duration::from_secs(4 * 3600),
            token_ttl: Duration::from_secs(3600),
            heartbeat_timeout: Duration::from_secs(3),
            eviction_timeout: Duration::from_secs(15),
            health: HealthConfig::default(),
            gc: GcConfig::default(),
        }
    }
}

/// Circuit-breaker probe configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval between canary probes of the volatile tier.
    #[serde(with = "humantime_serde")]
    pub probe_interval: Duration,

    /// Consecutive probe failures before the tier is marked unhealthy.
    /// A single success flips it back: a false-healthy only costs one more
    /// miss-and-fallback cycle.
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(60),
            failure_threshold: 3,
        }
    }
}

/// Garbage collection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GcConfig {
    /// How often the expired-session sweep runs.
    #[serde(with = "humantime_serde")]
    pub expired_sweep_interval: Duration,

    /// How often the inactive-session sweep runs.
    #[serde(with = "humantime_serde")]
    pub inactive_sweep_interval: Duration,

    /// Sessions idle longer than this are deactivated by the inactive sweep.
    #[serde(with = "humantime_serde")]
    pub inactive_after: Duration,

    /// Sessions idle longer than this are hard-deleted to bound storage.
    #[serde(with = "humantime_serde")]
    pub delete_after: Duration,

    /// Upper bound on rows touched per expired-sweep batch.
    pub sweep_batch_size: u32,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            expired_sweep_interval: Duration::from_secs(15 * 60),
            inactive_sweep_interval: Duration::from_secs(12 * 3600),
            inactive_after: Duration::from_secs(2 * 24 * 3600),
            delete_after: Duration::from_secs(4 * 24 * 3600),
            sweep_batch_size: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionCacheConfig::default();
        assert_eq!(config.max_sessions_per_tenant, 5);
        assert_eq!(config.inactivity_window, Duration::from_secs(14_400));
        assert_eq!(config.health.failure_threshold, 3);
        assert_eq!(config.gc.sweep_batch_size, 500);
        assert!(config.gc.delete_after > config.gc.inactive_after);
    }

    #[test]
    fn test_toml_roundtrip_with_humantime() {
        let toml = r#"
            max_sessions_per_tenant = 3
            inactivity_window = "2h"

            [health]
            probe_interval = "30s"

            [gc]
            inactive_after = "1d"
        "#;
        let config: SessionCacheConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_sessions_per_tenant, 3);
        assert_eq!(config.inactivity_window, Duration::from_secs(7200));
        assert_eq!(config.health.probe_interval, Duration::from_secs(30));
        // Unspecified sections keep their defaults.
        assert_eq!(config.health.failure_threshold, 3);
        assert_eq!(config.gc.inactive_after, Duration::from_secs(86_400));
        assert_eq!(config.token_ttl, Duration::from_secs(3600));
    }
}
