//! Backup orchestration.
//!
//! Domains are processed one at a time:
//!
//! ```text
//! Discovered ─► CheckingState ─► Quiescing ─► Polling ─► BackingUp ─► Restoring ─► Done
//!                    │                           │
//!                    ▼                           ▼
//!                 Skipped                     Aborted
//! ```
//!
//! A failure in one domain is recorded in the [`RunReport`] and the run moves
//! on. Once a quiesce command has been issued for a domain, or it was found
//! paused in suspend mode, it is registered for rollback: if the run is
//! interrupted, every registered domain is started or resumed again before
//! the run returns. Only a domain found shut off is left as it was.

use chrono::{DateTime, Utc};
use kvmbackup_hypervisor::{Domain, Hypervisor, OffMode, PowerState};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::cancel::Cancellation;
use crate::config::{BackupConfig, TimeoutPolicy};
use crate::copier::DiskCopier;
use crate::discovery::{self, Target};
use crate::error::{BackupError, Result};

/// Exit code for a run that was interrupted and rolled back.
pub const EXIT_INTERRUPTED: u8 = 130;

/// How the backup of one domain ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainOutcome {
    /// Every disk was copied.
    Completed {
        disks: usize,
        bytes: u64,
        /// False for cold backups of domains that were already quiesced.
        restored: bool,
    },
    /// Not running in `--all` mode; left untouched.
    Skipped { state: PowerState },
    /// Never reached its quiesced state; nothing was copied.
    TimedOut { attempts: u32 },
    /// Processing stopped with an error.
    Failed(String),
    /// The run was interrupted while this domain was in progress.
    Interrupted,
}

impl DomainOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, DomainOutcome::TimedOut { .. } | DomainOutcome::Failed(_))
    }
}

/// Outcome of one domain within a run.
#[derive(Debug, Clone)]
pub struct DomainReport {
    pub name: String,
    pub outcome: DomainOutcome,
}

/// Summary of a whole run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub domains: Vec<DomainReport>,
    /// The run was cancelled and a rollback pass ran.
    pub interrupted: bool,
}

impl RunReport {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            domains: Vec::new(),
            interrupted: false,
        }
    }

    fn record(&mut self, name: &str, outcome: DomainOutcome) {
        self.domains.push(DomainReport {
            name: name.to_string(),
            outcome,
        });
    }

    /// Outcome recorded for `name`, if any.
    pub fn outcome(&self, name: &str) -> Option<&DomainOutcome> {
        self.domains.iter().find(|d| d.name == name).map(|d| &d.outcome)
    }

    /// Process exit code: 130 when interrupted, 1 when any domain failed or
    /// timed out, 0 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.interrupted {
            EXIT_INTERRUPTED
        } else if self.domains.iter().any(|d| d.outcome.is_failure()) {
            1
        } else {
            0
        }
    }

    pub fn log_summary(&self) {
        for report in &self.domains {
            match &report.outcome {
                DomainOutcome::Completed { disks, bytes, restored } => {
                    info!(domain = %report.name, disks, bytes, restored, "Backup completed")
                }
                DomainOutcome::Skipped { state } => {
                    info!(domain = %report.name, state = %state, "Skipped")
                }
                DomainOutcome::TimedOut { attempts } => {
                    warn!(domain = %report.name, attempts, "Not quiesced, no backup taken")
                }
                DomainOutcome::Failed(reason) => {
                    error!(domain = %report.name, error = %reason, "Backup failed")
                }
                DomainOutcome::Interrupted => {
                    warn!(domain = %report.name, "Interrupted, rolled back")
                }
            }
        }

        let duration = self.finished_at - self.started_at;
        info!(
            domains = self.domains.len(),
            interrupted = self.interrupted,
            duration_secs = duration.num_seconds(),
            "Backup run finished"
        );
    }
}

/// Drives discovery, quiescing, copying and restoring for a run.
pub struct Orchestrator {
    config: BackupConfig,
    hypervisor: Arc<dyn Hypervisor>,
    copier: DiskCopier,
    cancel: Cancellation,
}

impl Orchestrator {
    pub fn new(config: BackupConfig, hypervisor: Arc<dyn Hypervisor>, cancel: Cancellation) -> Self {
        let copier = DiskCopier::new(config.chunk_size).with_progress(config.show_progress);
        Self {
            config,
            hypervisor,
            copier,
            cancel,
        }
    }

    /// Back up everything `target` selects.
    pub async fn run(&self, target: &Target) -> RunReport {
        let started_at = Utc::now();

        let domains = match discovery::discover(&self.config.config_dir, target, &self.config.exclude) {
            Ok(domains) => domains,
            Err(e) => {
                error!(error = %e, "Domain discovery failed");
                let name = match target {
                    Target::Single(name) => name.as_str(),
                    Target::All => "*",
                };
                let mut report = RunReport::new();
                report.record(name, DomainOutcome::Failed(e.to_string()));
                return report;
            }
        };

        let mut report = self.backup_domains(&domains, target.is_explicit()).await;
        report.started_at = started_at;
        report
    }

    /// Back up already discovered domains in order.
    pub async fn backup_domains(&self, domains: &[Domain], explicit: bool) -> RunReport {
        let mut report = RunReport::new();
        let mut registered: Vec<String> = Vec::new();

        for domain in domains {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.backup_domain(domain, explicit, &mut registered).await {
                Ok(outcome) => report.record(&domain.name, outcome),
                Err(BackupError::Cancelled) => {
                    warn!(domain = %domain.name, "Interrupted");
                    report.record(&domain.name, DomainOutcome::Interrupted);
                    break;
                }
                Err(e) => {
                    error!(domain = %domain.name, error = %e, "Domain backup failed");
                    report.record(&domain.name, DomainOutcome::Failed(e.to_string()));
                }
            }
        }

        if self.cancel.is_cancelled() {
            report.interrupted = true;
            self.rollback(&registered).await;
        }

        report.finished_at = Utc::now();
        report
    }

    #[instrument(skip_all, fields(domain = %domain.name))]
    async fn backup_domain(
        &self,
        domain: &Domain,
        explicit: bool,
        registered: &mut Vec<String>,
    ) -> Result<DomainOutcome> {
        let name = domain.name.as_str();

        let state = self.hypervisor.power_state(name).await?;
        info!(state = %state, "Checked domain state");

        if !explicit && !state.is_running() {
            info!(state = %state, "Domain not running, skipping");
            return Ok(DomainOutcome::Skipped { state });
        }

        if state.is_shut_off() {
            // Already off before the run: copy as is, no restart.
            info!("Domain already shut off, taking cold backup");
            let (disks, bytes) = self.copy_disks(domain).await?;
            return Ok(DomainOutcome::Completed {
                disks,
                bytes,
                restored: false,
            });
        }

        if state == self.config.off_mode.target_state() {
            info!(state = %state, "Domain already in target state, no quiesce needed");
            registered.push(name.to_string());
        } else {
            self.quiesce(name).await?;
            registered.push(name.to_string());

            match self.wait_quiesced(name).await {
                Ok(_) => {}
                Err(BackupError::QuiesceTimeout { attempts, .. }) => {
                    warn!(attempts, "Domain taking too long to quiesce, skipping");
                    if self.config.on_quiesce_timeout == TimeoutPolicy::Restore {
                        self.restore(name).await?;
                    }
                    return Ok(DomainOutcome::TimedOut { attempts });
                }
                Err(BackupError::Cancelled) => return Err(BackupError::Cancelled),
                Err(e) => {
                    if let Err(restore_err) = self.restore(name).await {
                        error!(error = %restore_err, "Failed to restore domain after error");
                    }
                    return Err(e);
                }
            }
        }

        let copied = self.copy_disks(domain).await;
        if let Err(BackupError::Cancelled) = copied {
            // Rollback restores registered domains.
            return Err(BackupError::Cancelled);
        }

        let restored = self.restore(name).await;

        match (copied, restored) {
            (Ok((disks, bytes)), Ok(())) => Ok(DomainOutcome::Completed {
                disks,
                bytes,
                restored: true,
            }),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), restored) => {
                if let Err(restore_err) = restored {
                    error!(error = %restore_err, "Failed to restore domain after copy error");
                }
                Err(e)
            }
        }
    }

    /// Issue the configured quiesce command.
    async fn quiesce(&self, name: &str) -> Result<()> {
        match self.config.off_mode {
            OffMode::Shutdown => {
                info!(wait_secs = self.config.retry_interval_secs, "Shutting down domain");
                self.hypervisor.shutdown(name).await?;
            }
            OffMode::Suspend => {
                info!(wait_secs = self.config.retry_interval_secs, "Suspending domain");
                self.hypervisor.suspend(name).await?;
            }
        }
        Ok(())
    }

    /// Blind wait, then poll until the domain reaches the off-mode's target
    /// state. Performs at most `max_retries` checks.
    ///
    /// Returns the number of checks it took.
    async fn wait_quiesced(&self, name: &str) -> Result<u32> {
        let target = self.config.off_mode.target_state();
        let interval = self.config.retry_interval();
        let max_retries = self.config.max_retries;

        self.cancel.sleep(interval).await?;

        for attempt in 1..=max_retries {
            let state = self.hypervisor.power_state(name).await?;
            if state == target {
                debug!(attempt, "Domain quiesced");
                return Ok(attempt);
            }

            info!(attempt, max_retries, state = %state, "Still waiting");

            if attempt < max_retries {
                self.cancel.sleep(interval).await?;
            }
        }

        Err(BackupError::QuiesceTimeout {
            domain: name.to_string(),
            attempts: max_retries,
        })
    }

    /// Copy every disk in descriptor order.
    async fn copy_disks(&self, domain: &Domain) -> Result<(usize, u64)> {
        info!(disks = domain.disks.len(), dest = %self.config.destination.display(), "Starting backup");

        let mut bytes = 0;
        for (index, disk) in domain.disks.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(BackupError::Cancelled);
            }

            info!(disk = %disk.display(), index = index + 1, total = domain.disks.len(), "Copying disk");
            bytes += self.copier.copy(disk, &self.config.destination).await?;
        }

        Ok((domain.disks.len(), bytes))
    }

    /// Bring a domain back up based on its live state.
    async fn restore(&self, name: &str) -> Result<()> {
        let state = self.hypervisor.power_state(name).await?;

        match state {
            PowerState::ShutOff => {
                info!(domain = %name, "Starting domain");
                self.hypervisor.start(name).await?;
            }
            PowerState::Paused => {
                info!(domain = %name, "Resuming domain");
                self.hypervisor.resume(name).await?;
            }
            PowerState::Running => {
                debug!(domain = %name, "Domain already running");
            }
            PowerState::Unknown => {
                warn!(domain = %name, off_mode = %self.config.off_mode, "Domain state unknown, restoring by off mode");
                match self.config.off_mode {
                    OffMode::Shutdown => self.hypervisor.start(name).await?,
                    OffMode::Suspend => self.hypervisor.resume(name).await?,
                }
            }
        }

        Ok(())
    }

    /// Best-effort restore of every registered domain.
    async fn rollback(&self, registered: &[String]) {
        warn!(domains = registered.len(), "Rolling back interrupted run");

        for name in registered {
            if let Err(e) = self.restore(name).await {
                error!(domain = %name, error = %e, "Rollback failed for domain");
            }
        }
    }
}
