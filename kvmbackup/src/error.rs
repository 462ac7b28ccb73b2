//! Error types for a backup run.

use kvmbackup_hypervisor::HypervisorError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can end the backup of a single domain.
#[derive(Error, Debug)]
pub enum BackupError {
    /// Descriptor parsing or a control command failed.
    #[error(transparent)]
    Hypervisor(#[from] HypervisorError),

    /// Reading a disk image or writing its copy failed.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The domain did not reach its quiesced state in time.
    #[error("Domain {domain} not quiesced after {attempts} checks")]
    QuiesceTimeout { domain: String, attempts: u32 },

    /// The run was interrupted.
    #[error("Backup run was interrupted")]
    Cancelled,
}

impl BackupError {
    /// Build a closure that wraps an I/O error with the path it concerns.
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| BackupError::Io { path, source }
    }
}

/// Result type alias for backup operations.
pub type Result<T> = std::result::Result<T, BackupError>;
