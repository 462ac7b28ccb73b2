//! Libvirt domain descriptor parsing.
//!
//! Only the parts of the domain XML the backup needs are read: the domain
//! name and the backing files of its `<disk device="disk">` entries.
//!
//! ```xml
//! <domain type='kvm'>
//!   <name>web1</name>
//!   <devices>
//!     <disk type='file' device='disk'>
//!       <source file='/var/lib/libvirt/images/web1.qcow2'/>
//!     </disk>
//!     <disk type='file' device='cdrom'/>
//!   </devices>
//! </domain>
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{HypervisorError, Result};
use crate::types::Domain;

#[derive(Debug, Deserialize)]
struct DomainXml {
    name: Option<String>,
    #[serde(default)]
    devices: DevicesXml,
}

#[derive(Debug, Default, Deserialize)]
struct DevicesXml {
    // Disks are usually adjacent but libvirt does not guarantee it;
    // `overlapped-lists` collects them across other device elements.
    #[serde(default, rename = "disk")]
    disks: Vec<DiskXml>,
}

#[derive(Debug, Deserialize)]
struct DiskXml {
    #[serde(rename = "@device")]
    device: Option<String>,
    #[serde(default, rename = "source")]
    sources: Vec<SourceXml>,
}

#[derive(Debug, Deserialize)]
struct SourceXml {
    #[serde(rename = "@file")]
    file: Option<String>,
}

impl Domain {
    /// Read and parse the descriptor at `path`.
    pub fn from_descriptor(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| HypervisorError::ConfigParse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        parse_descriptor(&content, path)
    }
}

/// Parse descriptor XML that was read from `path`.
pub fn parse_descriptor(xml: &str, path: &Path) -> Result<Domain> {
    let parse_error = |reason: String| HypervisorError::ConfigParse {
        path: path.display().to_string(),
        reason,
    };

    let doc: DomainXml = quick_xml::de::from_str(xml).map_err(|e| parse_error(e.to_string()))?;

    let name = doc
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| parse_error("missing <name> element".to_string()))?;

    let disks: Vec<PathBuf> = doc
        .devices
        .disks
        .into_iter()
        .filter(|disk| disk.device.as_deref() == Some("disk"))
        .flat_map(|disk| disk.sources)
        .filter_map(|source| source.file)
        .map(PathBuf::from)
        .collect();

    debug!(domain = %name, disks = disks.len(), path = %path.display(), "Parsed domain descriptor");

    Ok(Domain {
        name,
        config_path: path.to_path_buf(),
        disks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEB1: &str = r#"<domain type='kvm'>
  <name>web1</name>
  <uuid>4dea22b3-1d52-d8f3-2516-782e98ab3fa0</uuid>
  <memory unit='KiB'>2097152</memory>
  <devices>
    <emulator>/usr/bin/qemu-system-x86_64</emulator>
    <disk type='file' device='disk'>
      <driver name='qemu' type='qcow2'/>
      <source file='/var/lib/libvirt/images/web1.qcow2'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <disk type='file' device='cdrom'>
      <source file='/srv/iso/install.iso'/>
      <target dev='hdc' bus='ide'/>
      <readonly/>
    </disk>
    <controller type='usb' index='0'/>
    <disk type='file' device='disk'>
      <source file='/var/lib/libvirt/images/web1-data.img'/>
      <target dev='vdb' bus='virtio'/>
    </disk>
    <interface type='network'>
      <source network='default'/>
    </interface>
  </devices>
</domain>"#;

    fn parse(xml: &str) -> Result<Domain> {
        parse_descriptor(xml, Path::new("/etc/libvirt/qemu/test.xml"))
    }

    #[test]
    fn test_parses_name_and_disks_in_order() {
        let domain = parse(WEB1).unwrap();
        assert_eq!(domain.name, "web1");
        assert_eq!(domain.config_path, PathBuf::from("/etc/libvirt/qemu/test.xml"));
        assert_eq!(
            domain.disks,
            vec![
                PathBuf::from("/var/lib/libvirt/images/web1.qcow2"),
                PathBuf::from("/var/lib/libvirt/images/web1-data.img"),
            ]
        );
    }

    #[test]
    fn test_disk_without_source_is_skipped() {
        let xml = r#"<domain type='kvm'>
  <name>empty-drive</name>
  <devices>
    <disk type='file' device='disk'>
      <target dev='vda' bus='virtio'/>
    </disk>
    <disk type='network' device='disk'>
      <source protocol='rbd' name='pool/image'/>
    </disk>
  </devices>
</domain>"#;

        let domain = parse(xml).unwrap();
        assert_eq!(domain.name, "empty-drive");
        assert!(domain.disks.is_empty());
    }

    #[test]
    fn test_domain_without_devices() {
        let domain = parse("<domain><name>bare</name></domain>").unwrap();
        assert_eq!(domain.name, "bare");
        assert!(domain.disks.is_empty());
    }

    #[test]
    fn test_missing_name_is_parse_error() {
        let err = parse("<domain><devices/></domain>").unwrap_err();
        assert!(matches!(err, HypervisorError::ConfigParse { .. }));
        assert!(err.to_string().contains("missing <name>"));
    }

    #[test]
    fn test_malformed_xml_is_parse_error() {
        let err = parse("<domain><name>broken</nam></domain>").unwrap_err();
        assert!(matches!(err, HypervisorError::ConfigParse { .. }));
    }

    #[test]
    fn test_from_descriptor_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("web1.xml");
        std::fs::write(&path, WEB1).unwrap();

        let domain = Domain::from_descriptor(&path).unwrap();
        assert_eq!(domain.name, "web1");
        assert_eq!(domain.config_path, path);
        assert_eq!(domain.disks.len(), 2);

        let missing = Domain::from_descriptor(dir.path().join("nope.xml")).unwrap_err();
        assert!(matches!(missing, HypervisorError::ConfigParse { .. }));
    }
}
