//! Configuration management for backup runs.
//!
//! Configuration is read from a YAML file (default
//! `/etc/kvmbackup/kvmbackup.yaml`), then overridden by command-line flags.
//! The resulting [`BackupConfig`] is built once in `main` and handed to the
//! orchestrator.

use anyhow::{Context, Result};
use kvmbackup_hypervisor::OffMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Args;

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "/etc/kvmbackup/kvmbackup.yaml";

/// Largest accepted copy chunk size
const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Backup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Directory holding one libvirt descriptor per domain
    pub config_dir: PathBuf,

    /// Directory the disk images are copied into
    pub destination: PathBuf,

    /// Quiesce checks before a domain is given up on
    pub max_retries: u32,

    /// Seconds of the blind wait after quiescing and between checks
    pub retry_interval_secs: u64,

    /// How running domains are quiesced
    pub off_mode: OffMode,

    /// Domains never backed up in `--all` mode
    pub exclude: Vec<String>,

    /// Copy chunk size in bytes
    pub chunk_size: usize,

    /// What to do with a domain that never reached its quiesced state
    pub on_quiesce_timeout: TimeoutPolicy,

    /// Print the in-place copy progress line on stdout
    pub show_progress: bool,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log format (pretty, json)
    pub log_format: LogFormat,

    /// Control utility settings
    pub hypervisor: HypervisorConfig,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("/etc/libvirt/qemu"),
            destination: PathBuf::from("/mnt/backup"),
            max_retries: 5,
            retry_interval_secs: 60,
            off_mode: OffMode::Shutdown,
            exclude: Vec::new(),
            chunk_size: 64 * 1024,
            on_quiesce_timeout: TimeoutPolicy::Leave,
            show_progress: true,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            hypervisor: HypervisorConfig::default(),
        }
    }
}

/// Handling of domains whose quiesce wait ran out of retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutPolicy {
    /// Leave the domain in whatever state it reached; an operator has to look
    Leave,
    /// Start or resume the domain right away
    Restore,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::Leave
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Pretty
    }
}

/// Control utility configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HypervisorConfig {
    /// virsh binary path
    pub virsh_path: String,
    /// Libvirt connection URI, virsh's default connection if unset
    pub connect_uri: Option<String>,
}

impl Default for HypervisorConfig {
    fn default() -> Self {
        Self {
            virsh_path: "virsh".to_string(),
            connect_uri: None,
        }
    }
}

impl BackupConfig {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: BackupConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref level) = args.log_level {
            self.log_level = level.clone();
        }

        if let Some(ref dest) = args.dest {
            self.destination = dest.clone();
        }

        if let Some(ref dir) = args.config_dir {
            self.config_dir = dir.clone();
        }

        if let Some(mode) = args.off_mode {
            self.off_mode = mode;
        }

        if let Some(retries) = args.max_retries {
            self.max_retries = retries;
        }

        if let Some(interval) = args.retry_interval {
            self.retry_interval_secs = interval;
        }

        if args.no_progress {
            self.show_progress = false;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_retries".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::InvalidValue {
                field: "chunk_size".to_string(),
                message: "must be between 1 byte and 64MB".to_string(),
            });
        }

        if self.destination.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "destination".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        if self.config_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "config_dir".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "log_level".to_string(),
                message: format!("must be one of: {:?}", valid_levels),
            });
        }

        Ok(())
    }

    /// Whether `name` is on the exclusion list.
    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclude.iter().any(|excluded| excluded == name)
    }

    /// Blind wait and polling interval.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
