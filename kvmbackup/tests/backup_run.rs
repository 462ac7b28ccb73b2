//! End-to-end backup runs against the mock hypervisor.
//!
//! Descriptors and disk images live in temporary directories; the mock
//! backend records every control call so the sequence can be checked.

use kvmbackup::config::BackupConfig;
use kvmbackup::{Cancellation, DomainOutcome, Orchestrator, Target};
use kvmbackup_hypervisor::{MockBackend, MockCall, PowerState, QuiesceBehavior};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const MIB: usize = 1024 * 1024;

struct Host {
    config_dir: tempfile::TempDir,
    images: tempfile::TempDir,
    dest: tempfile::TempDir,
}

impl Host {
    fn new() -> Self {
        Self {
            config_dir: tempfile::tempdir().unwrap(),
            images: tempfile::tempdir().unwrap(),
            dest: tempfile::tempdir().unwrap(),
        }
    }

    /// Write a descriptor for `name` with one disk image per entry of `disks`.
    fn define(&self, name: &str, disks: &[(&str, usize)]) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        let mut devices = String::new();

        for (file, len) in disks {
            let path = self.images.path().join(file);
            std::fs::write(&path, fill(*len)).unwrap();
            devices.push_str(&format!(
                "<disk type='file' device='disk'><driver name='qemu' type='raw'/>\
                 <source file='{}'/><target dev='vda' bus='virtio'/></disk>",
                path.display()
            ));
            paths.push(path);
        }

        let xml = format!(
            "<domain type='kvm'><name>{}</name><memory unit='KiB'>1048576</memory>\
             <devices>{}<interface type='network'><source network='default'/></interface>\
             </devices></domain>",
            name, devices
        );
        std::fs::write(self.config_dir.path().join(format!("{}.xml", name)), xml).unwrap();
        paths
    }

    fn config(&self) -> BackupConfig {
        BackupConfig {
            config_dir: self.config_dir.path().to_path_buf(),
            destination: self.dest.path().to_path_buf(),
            max_retries: 3,
            retry_interval_secs: 0,
            chunk_size: MIB,
            show_progress: false,
            ..Default::default()
        }
    }

    fn dest(&self, file: &str) -> PathBuf {
        self.dest.path().join(file)
    }
}

fn fill(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).unwrap().len()
}

#[tokio::test]
async fn test_all_mode_backs_up_running_domain_and_skips_excluded() {
    let host = Host::new();
    let disks = host.define("vm1", &[("vm1.img", 100 * MIB)]);
    host.define("vm2", &[("vm2.img", 1024)]);

    let backend = Arc::new(
        MockBackend::new()
            .with_domain("vm1", PowerState::Running)
            .with_domain("vm2", PowerState::Running),
    );
    let config = BackupConfig {
        exclude: vec!["vm2".to_string()],
        ..host.config()
    };

    let report = Orchestrator::new(config, backend.clone(), Cancellation::new())
        .run(&Target::All)
        .await;

    assert_eq!(report.domains.len(), 1);
    assert_eq!(
        report.outcome("vm1"),
        Some(&DomainOutcome::Completed {
            disks: 1,
            bytes: (100 * MIB) as u64,
            restored: true
        })
    );
    assert_eq!(file_len(&host.dest("vm1.img")), (100 * MIB) as u64);
    assert_eq!(std::fs::read(host.dest("vm1.img")).unwrap(), std::fs::read(&disks[0]).unwrap());
    assert!(!host.dest("vm2.img").exists());

    assert_eq!(
        backend.commands(),
        vec![MockCall::Shutdown("vm1".into()), MockCall::Start("vm1".into())]
    );
    assert_eq!(backend.query_count("vm2"), 0);
    assert_eq!(backend.state_of("vm1"), Some(PowerState::Running));
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_all_mode_copies_disks_in_descriptor_order() {
    let host = Host::new();
    host.define("db", &[("db-os.qcow2", 4096), ("db-data.img", 8192)]);

    let backend = Arc::new(MockBackend::new().with_domain("db", PowerState::Running));

    let report = Orchestrator::new(host.config(), backend.clone(), Cancellation::new())
        .run(&Target::All)
        .await;

    assert_eq!(
        report.outcome("db"),
        Some(&DomainOutcome::Completed { disks: 2, bytes: 12288, restored: true })
    );
    assert_eq!(file_len(&host.dest("db-os.qcow2")), 4096);
    assert_eq!(file_len(&host.dest("db-data.img")), 8192);
}

#[tokio::test]
async fn test_single_mode_on_shut_off_domain_issues_no_commands() {
    let host = Host::new();
    host.define("archive", &[("archive.img", 2048)]);

    let backend = Arc::new(MockBackend::new().with_domain("archive", PowerState::ShutOff));

    let report = Orchestrator::new(host.config(), backend.clone(), Cancellation::new())
        .run(&Target::Single("archive".into()))
        .await;

    assert_eq!(
        report.outcome("archive"),
        Some(&DomainOutcome::Completed { disks: 1, bytes: 2048, restored: false })
    );
    assert!(backend.commands().is_empty());
    assert_eq!(backend.state_of("archive"), Some(PowerState::ShutOff));
    assert_eq!(file_len(&host.dest("archive.img")), 2048);
}

#[tokio::test]
async fn test_single_mode_ignores_exclusion_and_runs_full_cycle() {
    let host = Host::new();
    host.define("web1", &[("web1.img", 512)]);

    let backend = Arc::new(MockBackend::new().with_domain_behavior(
        "web1",
        PowerState::Running,
        QuiesceBehavior::AfterQueries(2),
    ));
    let config = BackupConfig {
        exclude: vec!["web1".to_string()],
        ..host.config()
    };

    let report = Orchestrator::new(config, backend.clone(), Cancellation::new())
        .run(&Target::Single("web1".into()))
        .await;

    assert!(matches!(report.outcome("web1"), Some(DomainOutcome::Completed { restored: true, .. })));
    assert_eq!(
        backend.commands(),
        vec![MockCall::Shutdown("web1".into()), MockCall::Start("web1".into())]
    );
}

#[tokio::test]
async fn test_single_mode_missing_descriptor_fails_run() {
    let host = Host::new();
    let backend = Arc::new(MockBackend::new());

    let report = Orchestrator::new(host.config(), backend.clone(), Cancellation::new())
        .run(&Target::Single("ghost".into()))
        .await;

    assert!(matches!(report.outcome("ghost"), Some(DomainOutcome::Failed(_))));
    assert!(backend.calls().is_empty());
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_interrupt_while_polling_rolls_back_registered_domains() {
    let host = Host::new();
    host.define("app1", &[("app1.img", 1024)]);
    host.define("web1", &[("web1.img", 1024)]);
    host.define("zz-last", &[("zz-last.img", 1024)]);

    let cancel = Cancellation::new();
    let trigger = cancel.clone();
    let web1_queries = Arc::new(AtomicUsize::new(0));
    let seen = web1_queries.clone();

    // The second query of web1 is its first poll after the shutdown.
    let backend = Arc::new(
        MockBackend::new()
            .with_domain("app1", PowerState::Running)
            .with_domain_behavior("web1", PowerState::Running, QuiesceBehavior::AfterQueries(1))
            .with_domain("zz-last", PowerState::Running)
            .on_power_state(move |name| {
                if name == "web1" && seen.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
                    trigger.cancel();
                }
            }),
    );

    let report = Orchestrator::new(host.config(), backend.clone(), cancel)
        .run(&Target::All)
        .await;

    assert!(report.interrupted);
    assert_eq!(report.exit_code(), 130);
    assert!(matches!(report.outcome("app1"), Some(DomainOutcome::Completed { .. })));
    assert_eq!(report.outcome("web1"), Some(&DomainOutcome::Interrupted));
    assert_eq!(report.outcome("zz-last"), None);

    assert_eq!(
        backend.commands(),
        vec![
            MockCall::Shutdown("app1".into()),
            MockCall::Start("app1".into()),
            MockCall::Shutdown("web1".into()),
            MockCall::Start("web1".into()),
        ]
    );
    assert_eq!(backend.state_of("web1"), Some(PowerState::Running));
    assert_eq!(backend.query_count("zz-last"), 0);
    assert!(host.dest("app1.img").exists());
    assert!(!host.dest("web1.img").exists());
    assert!(!host.dest("zz-last.img").exists());
}

#[tokio::test]
async fn test_rollback_resumes_suspended_domain() {
    let host = Host::new();
    host.define("cache", &[("cache.img", 1024)]);

    let cancel = Cancellation::new();
    let trigger = cancel.clone();
    let backend = Arc::new(
        MockBackend::new()
            .with_domain_behavior("cache", PowerState::Running, QuiesceBehavior::AfterQueries(0))
            .on_power_state(move |_| trigger.cancel()),
    );
    let config = BackupConfig {
        off_mode: kvmbackup_hypervisor::OffMode::Suspend,
        ..host.config()
    };

    // Cancelled on the state check; the blind wait ends early and rollback
    // finds the domain paused.
    let report = Orchestrator::new(config, backend.clone(), cancel)
        .run(&Target::Single("cache".into()))
        .await;

    assert!(report.interrupted);
    assert_eq!(report.outcome("cache"), Some(&DomainOutcome::Interrupted));
    assert_eq!(
        backend.commands(),
        vec![MockCall::Suspend("cache".into()), MockCall::Resume("cache".into())]
    );
    assert_eq!(backend.state_of("cache"), Some(PowerState::Running));
}

#[cfg(unix)]
#[tokio::test]
async fn test_interrupt_during_first_disk_skips_remaining_disks() {
    use std::io::Write;

    let host = Host::new();
    let paths = host.define("multi", &[("multi-os.img", 0), ("multi-data.img", 4096)]);

    // The first disk is a fifo fed by a writer thread, so the cancel flag is
    // raised while that copy is still in progress.
    std::fs::remove_file(&paths[0]).unwrap();
    let status = std::process::Command::new("mkfifo").arg(&paths[0]).status().unwrap();
    assert!(status.success());

    let cancel = Cancellation::new();
    let trigger = cancel.clone();
    let fifo = paths[0].clone();
    let writer = std::thread::spawn(move || {
        let mut pipe = std::fs::OpenOptions::new().write(true).open(&fifo).unwrap();
        pipe.write_all(&fill(2048)).unwrap();
        trigger.cancel();
    });

    let backend = Arc::new(MockBackend::new().with_domain("multi", PowerState::Running));

    let report = Orchestrator::new(host.config(), backend.clone(), cancel)
        .run(&Target::Single("multi".into()))
        .await;
    writer.join().unwrap();

    assert!(report.interrupted);
    assert_eq!(report.outcome("multi"), Some(&DomainOutcome::Interrupted));

    // The copy in progress finishes; the next disk is never started.
    assert_eq!(std::fs::read(host.dest("multi-os.img")).unwrap(), fill(2048));
    assert!(!host.dest("multi-data.img").exists());
    assert!(!host.dest("multi-data.img.partial").exists());

    assert_eq!(
        backend.commands(),
        vec![MockCall::Shutdown("multi".into()), MockCall::Start("multi".into())]
    );
    assert_eq!(backend.state_of("multi"), Some(PowerState::Running));
}

#[tokio::test]
async fn test_single_mode_paused_domain_is_resumed_after_backup() {
    let host = Host::new();
    host.define("cache", &[("cache.img", 100)]);

    let backend = Arc::new(MockBackend::new().with_domain("cache", PowerState::Paused));
    let config = BackupConfig {
        off_mode: kvmbackup_hypervisor::OffMode::Suspend,
        ..host.config()
    };

    let report = Orchestrator::new(config, backend.clone(), Cancellation::new())
        .run(&Target::Single("cache".into()))
        .await;

    assert_eq!(
        report.outcome("cache"),
        Some(&DomainOutcome::Completed { disks: 1, bytes: 100, restored: true })
    );
    assert_eq!(backend.commands(), vec![MockCall::Resume("cache".into())]);
    assert_eq!(backend.state_of("cache"), Some(PowerState::Running));
    assert_eq!(file_len(&host.dest("cache.img")), 100);
}
