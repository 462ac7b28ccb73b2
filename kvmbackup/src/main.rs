//! # kvmbackup
//!
//! Command-line entry point. Loads configuration, installs the interrupt
//! listener and runs the orchestrator once.
//!
//! ## Exit codes
//! - `0` success, or usage was shown
//! - `1` at least one domain failed or was not quiesced in time
//! - `2` configuration error
//! - `130` interrupted; registered domains were rolled back

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use kvmbackup::cli::Args;
use kvmbackup::config::{BackupConfig, LogFormat, DEFAULT_CONFIG_PATH};
use kvmbackup::orchestrator::EXIT_INTERRUPTED;
use kvmbackup::{Cancellation, Orchestrator};
use kvmbackup_hypervisor::VirshBackend;

const EXIT_CONFIG: u8 = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => {
                let _ = e.print();
                print_usage();
                return ExitCode::SUCCESS;
            }
        },
    };

    let Some(target) = args.target() else {
        print_usage();
        return ExitCode::SUCCESS;
    };

    let (config, source) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("kvmbackup: {:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let logging = match config.log_format {
        LogFormat::Pretty => kvmbackup_common::init_logging(&config.log_level),
        LogFormat::Json => kvmbackup_common::init_logging_json(&config.log_level),
    };
    if let Err(e) = logging {
        eprintln!("kvmbackup: {:#}", e);
        return ExitCode::from(EXIT_CONFIG);
    }

    info!(version = env!("CARGO_PKG_VERSION"), config = %source, "Starting kvmbackup");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return ExitCode::from(EXIT_CONFIG);
    }

    info!(
        config_dir = %config.config_dir.display(),
        destination = %config.destination.display(),
        off_mode = %config.off_mode,
        max_retries = config.max_retries,
        "Backup configured"
    );

    let cancel = Cancellation::new();
    spawn_interrupt_listener(cancel.clone());

    let backend = VirshBackend::new()
        .with_virsh(config.hypervisor.virsh_path.clone())
        .with_connect_uri(config.hypervisor.connect_uri.clone());

    let orchestrator = Orchestrator::new(config, Arc::new(backend), cancel);
    let report = orchestrator.run(&target).await;
    report.log_summary();

    ExitCode::from(report.exit_code())
}

/// Load the configuration file (explicit, or the default location if it
/// exists) and apply CLI overrides. Returns the config and where it came from.
fn load_config(args: &Args) -> anyhow::Result<(BackupConfig, String)> {
    match &args.config {
        Some(path) => {
            let config = BackupConfig::load(path)?;
            Ok((config.with_cli_overrides(args), path.clone()))
        }
        None => match BackupConfig::load(DEFAULT_CONFIG_PATH) {
            Ok(config) => Ok((config.with_cli_overrides(args), DEFAULT_CONFIG_PATH.to_string())),
            Err(_) if !std::path::Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Ok((BackupConfig::default().with_cli_overrides(args), "defaults".to_string()))
            }
            Err(e) => Err(e),
        },
    }
}

/// Cancel the run on the first Ctrl-C; exit immediately on the second.
fn spawn_interrupt_listener(cancel: Cancellation) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for interrupts");
                return;
            }

            if cancel.is_cancelled() {
                warn!("Second interrupt, exiting without finishing rollback");
                std::process::exit(EXIT_INTERRUPTED as i32);
            }

            warn!("Interrupt received, rolling back after the current step");
            cancel.cancel();
        }
    });
}

fn print_usage() {
    let _ = Args::command().print_help();
    println!();
}
