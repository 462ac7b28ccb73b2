//! Hypervisor control facade.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::PowerState;

/// Power-state control over domains, addressed by name.
///
/// Every operation returns once the control command has completed. None of
/// them wait for the resulting state transition; callers poll
/// [`Hypervisor::power_state`] for that.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Current power state of the domain, read live.
    ///
    /// Returns [`PowerState::Unknown`] if the hypervisor does not list it.
    async fn power_state(&self, name: &str) -> Result<PowerState>;

    /// Request a graceful (ACPI) shutdown.
    async fn shutdown(&self, name: &str) -> Result<()>;

    /// Freeze the domain's execution.
    async fn suspend(&self, name: &str) -> Result<()>;

    /// Resume a suspended domain.
    async fn resume(&self, name: &str) -> Result<()>;

    /// Boot a shut-off domain.
    async fn start(&self, name: &str) -> Result<()>;
}
