//! # kvmbackup
//!
//! Offline backups of libvirt/KVM domains. Each selected domain is shut
//! down or suspended, its disk images are copied to a destination
//! directory, and it is then started or resumed again.
//!
//! ## Usage
//! ```bash
//! kvmbackup web1          # one domain, whatever its state
//! kvmbackup --all         # every running, non-excluded domain
//! ```

pub mod cancel;
pub mod cli;
pub mod config;
pub mod copier;
pub mod discovery;
pub mod error;
pub mod orchestrator;

pub use cancel::Cancellation;
pub use config::BackupConfig;
pub use copier::DiskCopier;
pub use discovery::Target;
pub use error::BackupError;
pub use orchestrator::{DomainOutcome, Orchestrator, RunReport};
