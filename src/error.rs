//! Driver error types
//!
//! Fatal errors (connection bring-up, non-conflict provisioning failures, bad
//! configuration) surface from `initialize`. Topic, producer and consumer failures
//! outside the rebind path are propagated to the harness unchanged.

use crate::client::{AdminError, ClientError};
use thiserror::Error;

/// Main error type for driver operations
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Failed to connect to {endpoint}")]
    Connection {
        endpoint: String,
        #[source]
        source: ClientError,
    },

    #[error("Admin operation failed: {0}")]
    Admin(#[from] AdminError),

    #[error("Client operation failed: {0}")]
    Client(#[from] ClientError),

    #[error("Driver is not initialized")]
    NotInitialized,

    #[error("Driver is already initialized")]
    AlreadyInitialized,
}

impl DriverError {
    /// Create connection error for the given endpoint
    pub fn connection<S: Into<String>>(endpoint: S, source: ClientError) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// True when the underlying failure is an admin "already exists" response
    pub fn is_conflict(&self) -> bool {
        matches!(self, DriverError::Admin(e) if e.is_conflict())
    }
}

/// Result type for driver operations
pub type DriverResult<T> = Result<T, DriverError>;
