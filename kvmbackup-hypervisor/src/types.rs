//! Type definitions for domains and their power states.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// =============================================================================
// DOMAIN
// =============================================================================

/// One virtual machine as described by its libvirt descriptor.
///
/// The disk list is fixed when the descriptor is parsed; later edits to the
/// domain configuration are not observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    /// Domain name, unique per hypervisor
    pub name: String,
    /// Descriptor this domain was parsed from
    pub config_path: PathBuf,
    /// Backing disk files, in descriptor order
    pub disks: Vec<PathBuf>,
}

impl Domain {
    /// Create a domain with no disks.
    pub fn new(name: impl Into<String>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            config_path: config_path.into(),
            disks: Vec::new(),
        }
    }

    /// Add a backing disk file.
    pub fn with_disk(mut self, path: impl Into<PathBuf>) -> Self {
        self.disks.push(path.into());
        self
    }
}

// =============================================================================
// POWER STATE
// =============================================================================

/// Domain power state as reported by the hypervisor.
///
/// Always read live; never cache it across checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Running,
    Paused,
    ShutOff,
    Unknown,
}

impl Default for PowerState {
    fn default() -> Self {
        Self::Unknown
    }
}

impl PowerState {
    /// Map the state column of `virsh list` to a power state.
    ///
    /// "shut off" spans two columns, so only its first word is seen here.
    pub fn from_virsh(state: &str) -> Self {
        match state {
            "running" => PowerState::Running,
            "paused" => PowerState::Paused,
            "shut" => PowerState::ShutOff,
            _ => PowerState::Unknown,
        }
    }

    pub fn is_running(&self) -> bool {
        *self == PowerState::Running
    }

    pub fn is_suspended(&self) -> bool {
        *self == PowerState::Paused
    }

    pub fn is_shut_off(&self) -> bool {
        *self == PowerState::ShutOff
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::Running => "running",
            PowerState::Paused => "paused",
            PowerState::ShutOff => "shut off",
            PowerState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// OFF MODE
// =============================================================================

/// How a running domain is brought to a backup-safe state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffMode {
    /// ACPI shutdown; the domain is started again afterwards
    Shutdown,
    /// Freeze execution in memory; the domain is resumed afterwards
    Suspend,
}

impl Default for OffMode {
    fn default() -> Self {
        Self::Shutdown
    }
}

impl OffMode {
    /// State the domain must reach before its disks are copied.
    pub fn target_state(&self) -> PowerState {
        match self {
            OffMode::Shutdown => PowerState::ShutOff,
            OffMode::Suspend => PowerState::Paused,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OffMode::Shutdown => "shutdown",
            OffMode::Suspend => "suspend",
        }
    }
}

impl fmt::Display for OffMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OffMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "shutdown" => Ok(OffMode::Shutdown),
            "suspend" => Ok(OffMode::Suspend),
            other => Err(format!("unknown off mode '{}', expected shutdown or suspend", other)),
        }
    }
}
