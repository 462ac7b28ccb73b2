//! # kvmbackup Common
//!
//! Shared utilities for the kvmbackup binaries.
//!
//! ## Logging
//!
//! ```rust,ignore
//! use kvmbackup_common::init_logging;
//!
//! init_logging("info").unwrap();
//! tracing::info!(domain = "web1", "Backup started");
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json};
