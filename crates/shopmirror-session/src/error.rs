//! Session subsystem error types.
//!
//! This module defines all error types that can surface from token
//! resolution and session lifecycle operations. Volatile-tier (cache)
//! failures are deliberately absent from this taxonomy: they are absorbed
//! by the health monitor and never reach callers.

/// Errors that can occur during session and token operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No token could be resolved for the tenant. Surfaced to the caller
    /// as an authentication failure; the session simply re-authenticates.
    #[error("Not authenticated: no resolvable token for tenant '{domain}'")]
    NotAuthenticated {
        /// Tenant domain the resolution was attempted for.
        domain: String,
    },

    /// The durable session store failed. Fatal to the current request and
    /// not retried inline.
    #[error("Store error: {message}")]
    Store {
        /// Description of the storage failure.
        message: String,
    },

    /// The session configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl SessionError {
    /// Creates a new `NotAuthenticated` error.
    #[must_use]
    pub fn not_authenticated(domain: impl Into<String>) -> Self {
        Self::NotAuthenticated {
            domain: domain.into(),
        }
    }

    /// Creates a new `Store` error.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is an authentication failure (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::NotAuthenticated { .. })
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Store { .. } | Self::Configuration { .. } | Self::Internal { .. }
        )
    }

    /// Returns `true` if the durable store is at fault.
    #[must_use]
    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::Store { .. })
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
