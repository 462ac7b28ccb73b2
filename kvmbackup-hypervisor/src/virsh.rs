//! `virsh` command-line backend.
//!
//! Talks to libvirt through its control utility rather than the C library,
//! so the tool runs anywhere `virsh` does without linking libvirt.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info, instrument};

use crate::error::{HypervisorError, Result};
use crate::traits::Hypervisor;
use crate::types::PowerState;

/// Lines of `virsh list` output before the first domain row.
const LIST_HEADER_LINES: usize = 2;

/// Hypervisor backend driving the `virsh` binary.
#[derive(Debug, Clone)]
pub struct VirshBackend {
    /// virsh binary path
    virsh_path: String,
    /// Libvirt connection URI (`--connect`), default connection if unset
    connect_uri: Option<String>,
}

impl VirshBackend {
    /// Create a backend using `virsh` from `PATH` and the default connection.
    pub fn new() -> Self {
        Self {
            virsh_path: "virsh".to_string(),
            connect_uri: None,
        }
    }

    /// Set the virsh binary path.
    pub fn with_virsh(mut self, path: impl Into<String>) -> Self {
        self.virsh_path = path.into();
        self
    }

    /// Connect to a specific libvirt URI (e.g. `qemu:///system`).
    pub fn with_connect_uri(mut self, uri: Option<String>) -> Self {
        self.connect_uri = uri;
        self
    }

    /// Run virsh with `args` and return its stdout.
    async fn run(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.virsh_path);
        // State words in `list` output are translated under other locales.
        cmd.env("LC_ALL", "C");
        if let Some(uri) = &self.connect_uri {
            cmd.arg("--connect").arg(uri);
        }
        cmd.args(args);

        let command = format!("{} {}", self.virsh_path, args.join(" "));
        debug!(command = %command, "Executing command");

        let output = cmd.output().await.map_err(|e| HypervisorError::ControlCommand {
            command: command.clone(),
            reason: format!("failed to execute: {}", e),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(command = %command, status = %output.status, stderr = %stderr, "Command failed");
            return Err(HypervisorError::ControlCommand {
                command,
                reason: format!("{}: {}", output.status, stderr),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Default for VirshBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Find `name` in `virsh list --all` output.
///
/// ```text
///  Id   Name    State
/// -----------------------
///  3    web1    running
///  -    db1     shut off
/// ```
pub fn parse_domain_list(output: &str, name: &str) -> PowerState {
    output
        .lines()
        .skip(LIST_HEADER_LINES)
        .filter_map(|row| {
            let mut cols = row.split_whitespace();
            let _id = cols.next()?;
            let row_name = cols.next()?;
            let state = cols.next()?;
            Some((row_name, state))
        })
        .find(|(row_name, _)| *row_name == name)
        .map(|(_, state)| PowerState::from_virsh(state))
        .unwrap_or(PowerState::Unknown)
}

#[async_trait]
impl Hypervisor for VirshBackend {
    #[instrument(skip(self))]
    async fn power_state(&self, name: &str) -> Result<PowerState> {
        let output = self.run(&["list", "--all"]).await?;
        let state = parse_domain_list(&output, name);
        debug!(state = %state, "Queried power state");
        Ok(state)
    }

    #[instrument(skip(self))]
    async fn shutdown(&self, name: &str) -> Result<()> {
        info!("Shutting down domain");
        self.run(&["shutdown", name]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn suspend(&self, name: &str) -> Result<()> {
        info!("Suspending domain");
        self.run(&["suspend", name]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn resume(&self, name: &str) -> Result<()> {
        info!("Resuming domain");
        self.run(&["resume", name]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn start(&self, name: &str) -> Result<()> {
        info!("Starting domain");
        self.run(&["start", name]).await?;
        Ok(())
    }
}
