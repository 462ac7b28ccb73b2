//! # kvmbackup Hypervisor
//!
//! Hypervisor control layer for the backup tool.
//!
//! This crate provides:
//! - **Domain descriptors** - parsing libvirt domain XML into a [`Domain`]
//! - **Power state** - a tagged [`PowerState`] read live from the hypervisor
//! - **Control facade** - the [`Hypervisor`] trait with a `virsh` backend
//!   and an in-memory mock for tests
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Hypervisor Trait             │
//! │ (power_state, shutdown, suspend, ...)   │
//! └─────────────────────┬───────────────────┘
//!                       │
//!         ┌─────────────┴─────────────┐
//!         ▼                           ▼
//! ┌───────────────────┐     ┌───────────────────┐
//! │   VirshBackend    │     │    MockBackend    │
//! │  (virsh command)  │     │    (in memory)    │
//! └───────────────────┘     └───────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kvmbackup_hypervisor::{Domain, Hypervisor, VirshBackend};
//!
//! let domain = Domain::from_descriptor("/etc/libvirt/qemu/web1.xml")?;
//! let backend = VirshBackend::new();
//!
//! if backend.power_state(&domain.name).await?.is_running() {
//!     backend.suspend(&domain.name).await?;
//! }
//! ```

pub mod descriptor;
pub mod error;
pub mod mock;
pub mod traits;
pub mod types;
pub mod virsh;

pub use error::HypervisorError;
pub use mock::{MockBackend, MockCall, QuiesceBehavior};
pub use traits::Hypervisor;
pub use types::{Domain, OffMode, PowerState};
pub use virsh::VirshBackend;
