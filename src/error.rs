//! Error types for the fleet simulator.
//!
//! Steady-state failures (a broken client connection, a corrupt frame, a bad
//! control request, a slow observer) are isolated to the connection they occur
//! on and are logged, not returned. Of those, only emitter transport failures
//! are described as [`FleetError::Connection`]. The other variants cover what
//! the caller has to act on: listener setup, invalid configuration and I/O
//! during startup.
//!
//! ## Helper Constructors
//!
//! ```rust
//! use pckts::FleetError;
//!
//! let err = FleetError::invalid_config("clients", "must be at least 1");
//! assert!(matches!(err, FleetError::Config { .. }));
//!
//! let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
//! let err = FleetError::connection_failed("dialing 127.0.0.1:9000", refused);
//! assert!(err.to_string().contains("127.0.0.1:9000"));
//! ```

use std::net::SocketAddr;
use thiserror::Error;

/// Result type alias for fleet operations.
pub type Result<T, E = FleetError> = std::result::Result<T, E>;

/// Main error type for fleet operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FleetError {
    #[error("Failed to bind {role} listener on {addr}")]
    Bind {
        role: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection failed: {reason}: {source}")]
    Connection {
        reason: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration for '{field}': {reason}")]
    Config { field: String, reason: String },

    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl FleetError {
    /// Helper constructor for listener bind failures.
    pub fn bind_failed(role: &'static str, addr: SocketAddr, source: std::io::Error) -> Self {
        FleetError::Bind { role, addr, source }
    }

    /// Helper constructor for failures on an outbound transport connection.
    pub fn connection_failed(reason: impl Into<String>, source: std::io::Error) -> Self {
        FleetError::Connection { reason: reason.into(), source }
    }

    /// Helper constructor for configuration validation errors.
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        FleetError::Config { field: field.into(), reason: reason.into() }
    }

    /// Helper constructor for I/O errors with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        FleetError::Io { context: context.into(), source }
    }
}
