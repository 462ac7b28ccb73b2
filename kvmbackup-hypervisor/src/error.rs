//! Error types for the hypervisor control layer.

use thiserror::Error;

/// Errors that can occur while reading domain descriptors or
/// controlling domains.
#[derive(Error, Debug)]
pub enum HypervisorError {
    /// A domain descriptor is unreadable, malformed, or lacks its name.
    #[error("Failed to parse domain descriptor {path}: {reason}")]
    ConfigParse { path: String, reason: String },

    /// A control command could not be run, exited non-zero, or produced
    /// output that could not be understood.
    #[error("Control command `{command}` failed: {reason}")]
    ControlCommand { command: String, reason: String },

    /// Domain is in an invalid state for the requested operation.
    #[error("Invalid domain state for operation: {0}")]
    InvalidState(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for hypervisor operations.
pub type Result<T> = std::result::Result<T, HypervisorError>;
