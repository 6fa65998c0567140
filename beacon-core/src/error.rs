//! Error types for Beacon core operations
//!
//! Errors in this crate are internal: the tracker resolves every one of them
//! into a no-op or a degraded request before anything reaches the page. They
//! still carry stable codes and categories so that logs can be aggregated.
//!
//! # Example
//!
//! ```rust
//! use beacon_core::error::{BeaconError, ErrorCategory};
//!
//! let err = BeaconError::MalformedCookie {
//!     name: "_pk_ref.1.1fff".to_string(),
//!     reason: "expected a JSON array".to_string(),
//! };
//! assert_eq!(err.category(), ErrorCategory::Storage);
//! assert_eq!(err.error_code(), "MALFORMED_COOKIE");
//! assert!(err.is_recoverable());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for Beacon core operations
pub type Result<T> = std::result::Result<T, BeaconError>;

/// Error category for grouping related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Caller supplied invalid input
    Validation,
    /// Persisted cookie state could not be used
    Storage,
    /// A browser capability was missing or misbehaved
    Environment,
    /// JSON encoding or decoding failed
    Serialization,
}

/// Errors that can occur while building tracking state
#[derive(Error, Debug)]
pub enum BeaconError {
    // ═══════════════════════════════════════════════════════════════════════
    // Configuration and input errors
    // ═══════════════════════════════════════════════════════════════════════

    /// Configuration document is malformed or has out-of-range values
    #[error("Invalid tracker configuration: {reason}")]
    InvalidConfig { reason: String },

    /// A custom variable scope that is neither a name nor a legacy index
    #[error("Unknown custom variable scope '{scope}'. Use 'visit', 'page', 'event', 2 or 3.")]
    UnknownScope { scope: String },

    /// A URL could not be interpreted
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Persisted state errors
    // ═══════════════════════════════════════════════════════════════════════

    /// A first-party cookie held a value that does not parse
    #[error("Malformed cookie '{name}': {reason}")]
    MalformedCookie { name: String, reason: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Environment errors
    // ═══════════════════════════════════════════════════════════════════════

    /// A browser capability probe failed
    #[error("Environment capability '{capability}' unavailable")]
    CapabilityUnavailable { capability: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Infrastructure errors
    // ═══════════════════════════════════════════════════════════════════════

    /// JSON serialization or deserialization failed
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl BeaconError {
    /// Returns true if the tracker can carry on with default state
    ///
    /// Every persisted-state and environment failure is recoverable: the
    /// affected state is treated as absent. Only explicit caller input is not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BeaconError::MalformedCookie { .. }
                | BeaconError::CapabilityUnavailable { .. }
                | BeaconError::JsonError(_)
        )
    }

    /// Returns the error category for grouping
    pub fn category(&self) -> ErrorCategory {
        match self {
            BeaconError::InvalidConfig { .. }
            | BeaconError::UnknownScope { .. }
            | BeaconError::InvalidUrl { .. } => ErrorCategory::Validation,

            BeaconError::MalformedCookie { .. } => ErrorCategory::Storage,

            BeaconError::CapabilityUnavailable { .. } => ErrorCategory::Environment,

            BeaconError::JsonError(_) => ErrorCategory::Serialization,
        }
    }

    /// Returns the stable error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            BeaconError::InvalidConfig { .. } => "INVALID_CONFIG",
            BeaconError::UnknownScope { .. } => "UNKNOWN_SCOPE",
            BeaconError::InvalidUrl { .. } => "INVALID_URL",
            BeaconError::MalformedCookie { .. } => "MALFORMED_COOKIE",
            BeaconError::CapabilityUnavailable { .. } => "CAPABILITY_UNAVAILABLE",
            BeaconError::JsonError(_) => "JSON_ERROR",
        }
    }
}
