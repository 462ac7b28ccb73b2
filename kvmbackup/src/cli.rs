//! Command-line argument parsing.

use clap::Parser;
use kvmbackup_hypervisor::OffMode;
use std::path::PathBuf;

use crate::discovery::Target;

/// kvmbackup - Offline backup of KVM domain disk images
#[derive(Parser, Debug, Default)]
#[command(name = "kvmbackup")]
#[command(about = "kvmbackup - Offline backup of KVM domain disk images")]
#[command(version)]
pub struct Args {
    /// Domain to back up (e.g. web1, as listed by `virsh list`), whatever its state
    pub domain: Option<String>,

    /// Back up every non-excluded domain that is currently running
    #[arg(long)]
    pub all: bool,

    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Backup destination directory
    #[arg(long)]
    pub dest: Option<PathBuf>,

    /// Directory holding the libvirt domain descriptors
    #[arg(long)]
    pub config_dir: Option<PathBuf>,

    /// How to quiesce domains (shutdown, suspend)
    #[arg(long)]
    pub off_mode: Option<OffMode>,

    /// Quiesce checks before a domain is skipped
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Seconds between quiesce checks
    #[arg(long)]
    pub retry_interval: Option<u64>,

    /// Do not print the copy progress line
    #[arg(long)]
    pub no_progress: bool,
}

impl Args {
    /// What to back up, or `None` when usage should be shown instead.
    pub fn target(&self) -> Option<Target> {
        match (&self.domain, self.all) {
            (Some(_), true) | (None, false) => None,
            (Some(name), false) if name == "help" => None,
            (Some(name), false) => Some(Target::Single(name.clone())),
            (None, true) => Some(Target::All),
        }
    }
}
