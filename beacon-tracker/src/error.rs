//! Error types for Beacon Tracker

use thiserror::Error;

use beacon_core::BeaconError;

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

/// Errors that can occur in the tracker
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Error from the core state machine or configuration
    #[error(transparent)]
    Core(#[from] BeaconError),

    /// Queued command names no tracker method
    #[error("Unknown tracker method: {0}")]
    UnknownMethod(String),

    /// Queued command arguments have the wrong shape
    #[error("Invalid arguments for {method}: {reason}")]
    InvalidArguments { method: String, reason: String },

    /// The transport could not start the request at all
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrackerError {
    pub(crate) fn arguments(method: &str, reason: impl Into<String>) -> Self {
        TrackerError::InvalidArguments {
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}
