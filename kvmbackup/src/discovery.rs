//! Domain discovery from the libvirt configuration directory.

use kvmbackup_hypervisor::Domain;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{BackupError, Result};

/// Which domains a run backs up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// One named domain, backed up whatever its power state
    Single(String),
    /// Every non-excluded domain that is running when its turn comes
    All,
}

impl Target {
    /// Whether domains were named by the operator, which bypasses the
    /// running-state check.
    pub fn is_explicit(&self) -> bool {
        matches!(self, Target::Single(_))
    }
}

/// Collect the domains to back up.
///
/// In `All` mode a descriptor that fails to parse is logged and skipped;
/// in `Single` mode it is returned as the error.
pub fn discover(config_dir: &Path, target: &Target, exclude: &[String]) -> Result<Vec<Domain>> {
    match target {
        Target::Single(name) => {
            let path = config_dir.join(format!("{}.xml", name));
            let domain = Domain::from_descriptor(&path)?;
            info!(domain = %domain.name, disks = domain.disks.len(), "Discovered domain");
            Ok(vec![domain])
        }
        Target::All => {
            let mut domains = Vec::new();

            for path in descriptor_files(config_dir)? {
                let domain = match Domain::from_descriptor(&path) {
                    Ok(domain) => domain,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unreadable descriptor");
                        continue;
                    }
                };

                if exclude.iter().any(|name| *name == domain.name) {
                    debug!(domain = %domain.name, "Domain excluded");
                    continue;
                }

                domains.push(domain);
            }

            info!(count = domains.len(), dir = %config_dir.display(), "Discovered domains");
            Ok(domains)
        }
    }
}

/// `*.xml` files directly inside `dir`, sorted by name.
fn descriptor_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(BackupError::io(dir))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(BackupError::io(dir))?.path();
        let is_xml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("xml"))
            .unwrap_or(false);

        if is_xml && path.is_file() {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}
