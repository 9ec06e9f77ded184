//! Read-modify-write operations over a vmx file on disk. Every operation loads the whole
//! file, applies one narrow change and writes the whole file back.

use std::{
    fs::read_to_string,
    io::Write,
    path::Path,
    time::Duration,
};

use log::debug;
use tempfile::NamedTempFile;

use crate::{
    error::{Result, VmxError},
    lock::VmxLock,
    vmx::{AddressType, Ethernet, IdeDevice, IdeDeviceType, ScsiDevice, Vmx},
};

/// Settings that keep the guest's memory resident and unshared
const OPTIMIZED_SETTINGS: &[(&str, &str)] = &[
    ("prefvmx.useRecommendedLockedMemSize", "TRUE"),
    ("prefvmx.minVmMemPct", "100"),
    ("mainMem.useNamedFile", "FALSE"),
    ("sched.mem.pshare.enable", "FALSE"),
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NicInfo {
    pub network: String,
    pub mac: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiskInfo {
    pub slot: String,
    pub path: String,
}

/// Summary of a vmx file for callers that do not need the whole document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmInfo {
    pub name: String,
    pub cpus: u32,
    pub memory_mb: u32,
    pub clean_shutdown: bool,
    pub nics: Vec<NicInfo>,
    pub disks: Vec<DiskInfo>,
}

#[derive(Clone, Debug, Default)]
pub struct VmxBuilder {
    optimize: bool,
    lock_timeout: Option<Duration>,
}

impl VmxBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also apply the memory settings of [`OPTIMIZED_SETTINGS`] in [`Self::init_hardware`]
    pub fn optimized(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    /// Hold an advisory lock for the duration of each edit
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn load(&self, path: &Path) -> Result<Vmx> {
        read_to_string(path)
            .map_err(|e| VmxError::io(path, e))?
            .parse()
    }

    /// Write through a temporary file in the same directory and rename it over `path`
    pub fn store(&self, path: &Path, vmx: &Vmx) -> Result<()> {
        let text = vmx.encode()?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(dir).map_err(|e| VmxError::io(dir, e))?;
        file.write_all(text.as_bytes())
            .and_then(|_| file.as_file().sync_all())
            .map_err(|e| VmxError::io(file.path(), e))?;
        file.persist(path).map_err(|e| VmxError::io(path, e.error))?;
        Ok(())
    }

    fn edit<T>(&self, path: &Path, change: impl FnOnce(&mut Vmx) -> T) -> Result<T> {
        let _lock = match self.lock_timeout {
            Some(timeout) => Some(VmxLock::acquire(path, timeout)?),
            None => None,
        };
        let mut vmx = self.load(path)?;
        let out = change(&mut vmx);
        self.store(path, &vmx)?;
        debug!("Rewrote {}", path.to_string_lossy());
        Ok(out)
    }

    pub fn init_hardware(&self, path: &Path) -> Result<()> {
        let optimize = self.optimize;
        self.edit(path, |vmx| {
            vmx.vhv_enable = Some(true);
            vmx.tools_sync_time = Some(true);
            if optimize {
                for (key, value) in OPTIMIZED_SETTINGS {
                    vmx.set(key, value);
                }
            }
        })
    }

    /// Append a vmxnet3 adapter with a static MAC. Adding the same network twice gives
    /// the machine two adapters.
    pub fn add_network_interface(&self, path: &Path, network: &str, mac: &str) -> Result<()> {
        self.edit(path, |vmx| {
            vmx.ethernet.push(Ethernet {
                present: Some(true),
                network_name: Some(network.to_string()),
                address: Some(mac.to_string()),
                address_type: Some(AddressType::Static),
                virtual_dev: Some("vmxnet3".to_string()),
                connection_type: Some("custom".to_string()),
                extra: Vec::new(),
            })
        })
    }

    pub fn set_resources(&self, path: &Path, cpus: u32, memory_mb: u32) -> Result<()> {
        self.edit(path, |vmx| {
            vmx.num_vcpus = Some(cpus);
            vmx.memsize = Some(memory_mb);
        })
    }

    pub fn set_display_name(&self, path: &Path, name: &str) -> Result<()> {
        self.edit(path, |vmx| vmx.display_name = Some(name.to_string()))
    }

    /// Append a disk to the first SCSI controller and return the slot it was given.
    /// The returned slot is the device count before the append minus one. The stored
    /// file numbers devices by position.
    pub fn attach_disk(&self, path: &Path, disk_path: &str) -> Result<String> {
        self.edit(path, |vmx| {
            let slot = format!("scsi0:{}", vmx.scsi_devices.len() as i64 - 1);
            vmx.scsi_devices.push(ScsiDevice {
                present: Some(true),
                file_name: Some(disk_path.to_string()),
                extra: Vec::new(),
            });
            slot
        })
    }

    /// Remove the first disk backed by `disk_path`. Nothing happens when no disk matches.
    pub fn detach_disk(&self, path: &Path, disk_path: &str) -> Result<()> {
        self.edit(path, |vmx| {
            if let Some(idx) = vmx
                .scsi_devices
                .iter()
                .position(|d| d.file_name.as_deref() == Some(disk_path))
            {
                vmx.scsi_devices.remove(idx);
            }
        })
    }

    /// Replace all IDE devices with a single CD-ROM backed by `iso_path`
    pub fn attach_cdrom(&self, path: &Path, iso_path: &str) -> Result<()> {
        self.edit(path, |vmx| {
            vmx.ide_devices = vec![IdeDevice {
                present: Some(true),
                file_name: Some(iso_path.to_string()),
                device_type: Some(IdeDeviceType::CdromImage),
                start_connected: Some(true),
                extra: Vec::new(),
            }];
        })
    }

    pub fn info(&self, path: &Path) -> Result<VmInfo> {
        let vmx = self.load(path)?;
        Ok(VmInfo {
            name: vmx.display_name.clone().unwrap_or_default(),
            cpus: vmx.num_vcpus.unwrap_or(1),
            memory_mb: vmx.memsize.unwrap_or_default(),
            clean_shutdown: vmx.clean_shutdown.unwrap_or(false),
            nics: vmx
                .ethernet
                .iter()
                .map(|e| NicInfo {
                    network: e.network_name.clone().unwrap_or_default(),
                    mac: e.address.clone().unwrap_or_default(),
                })
                .collect(),
            disks: vmx
                .scsi_devices
                .iter()
                .enumerate()
                .map(|(i, d)| DiskInfo {
                    slot: Vmx::scsi_slot(i),
                    path: d.file_name.clone().unwrap_or_default(),
                })
                .collect(),
        })
    }
}

#[cfg(test)]
fn fixture(text: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vm-1.vmx");
    std::fs::write(&path, text).unwrap();
    (dir, path)
}

#[cfg(test)]
const BASE_VMX: &str = r#".encoding = "UTF-8"
displayName = "vm-1"
guestOS = "ubuntu-64"
scsi0.present = "TRUE"
scsi0:0.present = "TRUE"
scsi0:0.fileName = "root.vmdk"
"#;

#[test]
fn test_init_hardware() {
    let (_dir, path) = fixture(BASE_VMX);

    VmxBuilder::new().init_hardware(&path).unwrap();
    let vmx = VmxBuilder::new().load(&path).unwrap();

    assert_eq!(vmx.vhv_enable, Some(true));
    assert_eq!(vmx.tools_sync_time, Some(true));
    assert_eq!(vmx.get("mainMem.useNamedFile"), None);
    assert_eq!(vmx.get("guestOS"), Some("ubuntu-64"));
}

#[test]
fn test_init_hardware_optimized() {
    let (_dir, path) = fixture(BASE_VMX);

    VmxBuilder::new().optimized(true).init_hardware(&path).unwrap();
    let vmx = VmxBuilder::new().load(&path).unwrap();

    assert_eq!(vmx.get("mainmem.usenamedfile"), Some("FALSE"));
    assert_eq!(vmx.get("sched.mem.pshare.enable"), Some("FALSE"));
    assert_eq!(vmx.get("prefvmx.useRecommendedLockedMemSize"), Some("TRUE"));
}

#[test]
fn test_add_network_interface_twice() {
    let (_dir, path) = fixture(BASE_VMX);
    let builder = VmxBuilder::new();

    builder
        .add_network_interface(&path, "NetA", "00:11:22:33:44:55")
        .unwrap();
    builder
        .add_network_interface(&path, "NetA", "00:11:22:33:44:55")
        .unwrap();
    let vmx = builder.load(&path).unwrap();

    assert_eq!(vmx.ethernet.len(), 2);
    assert_eq!(vmx.ethernet[1].address_type, Some(AddressType::Static));
    assert_eq!(vmx.ethernet[1].virtual_dev.as_deref(), Some("vmxnet3"));
    assert_eq!(vmx.ethernet[1].connection_type.as_deref(), Some("custom"));
}

#[test]
fn test_attach_then_detach_disk_restores_devices() {
    let (_dir, path) = fixture(BASE_VMX);
    let builder = VmxBuilder::new();
    let before = builder.load(&path).unwrap().scsi_devices;

    let slot = builder.attach_disk(&path, "/store/disks/disk-1.vmdk").unwrap();
    assert_eq!(slot, "scsi0:0");
    let attached = builder.info(&path).unwrap();
    assert_eq!(attached.disks.len(), 2);
    assert_eq!(attached.disks[1].slot, "scsi0:1");
    assert_eq!(attached.disks[1].path, "/store/disks/disk-1.vmdk");

    builder.detach_disk(&path, "/store/disks/disk-1.vmdk").unwrap();
    assert_eq!(builder.load(&path).unwrap().scsi_devices, before);
}

#[test]
fn test_attach_disk_to_empty_controller() {
    let (_dir, path) = fixture("displayName = \"vm-1\"\n");

    let slot = VmxBuilder::new().attach_disk(&path, "a.vmdk").unwrap();

    assert_eq!(slot, "scsi0:-1");
    let info = VmxBuilder::new().info(&path).unwrap();
    assert_eq!(info.disks[0].slot, "scsi0:0");
}

#[test]
fn test_attached_disks_round_trip() {
    let (_dir, path) = fixture("displayName = \"vm-1\"\n");
    let builder = VmxBuilder::new();

    builder.attach_disk(&path, "a.vmdk").unwrap();
    builder.attach_disk(&path, "b.vmdk").unwrap();
    builder.attach_cdrom(&path, "env.iso").unwrap();
    let vmx = builder.load(&path).unwrap();

    assert_eq!(vmx.encode().unwrap().parse::<Vmx>().unwrap(), vmx);
    let info = builder.info(&path).unwrap();
    assert_eq!(info.disks[0].slot, "scsi0:0");
    assert_eq!(info.disks[1].slot, "scsi0:1");
    assert_eq!(info.disks[1].path, "b.vmdk");
}

#[test]
fn test_store_replaces_file() {
    let (dir, path) = fixture(BASE_VMX);
    let builder = VmxBuilder::new();

    builder.set_resources(&path, 4, 4096).unwrap();

    let names: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(names, vec![std::ffi::OsString::from("vm-1.vmx")]);
    assert_eq!(builder.load(&path).unwrap().memsize, Some(4096));
}

#[test]
fn test_detach_unknown_disk_is_noop() {
    let (_dir, path) = fixture(BASE_VMX);
    let builder = VmxBuilder::new();
    let before = builder.load(&path).unwrap();

    builder.detach_disk(&path, "missing.vmdk").unwrap();

    assert_eq!(builder.load(&path).unwrap(), before);
}

#[test]
fn test_attach_cdrom_replaces_existing() {
    let (_dir, path) = fixture(BASE_VMX);
    let builder = VmxBuilder::new().lock_timeout(Duration::from_secs(1));

    builder.attach_cdrom(&path, "/store/vm-1/old.iso").unwrap();
    builder.attach_cdrom(&path, "/store/vm-1/env.iso").unwrap();
    let vmx = builder.load(&path).unwrap();

    assert_eq!(vmx.ide_devices.len(), 1);
    assert_eq!(
        vmx.ide_devices[0].file_name.as_deref(),
        Some("/store/vm-1/env.iso")
    );
    assert_eq!(vmx.ide_devices[0].device_type, Some(IdeDeviceType::CdromImage));
    assert_eq!(vmx.ide_devices[0].start_connected, Some(true));
}

#[test]
fn test_set_resources_and_info() {
    let (_dir, path) = fixture(BASE_VMX);
    let builder = VmxBuilder::new();

    builder.set_resources(&path, 2, 2048).unwrap();
    builder.add_network_interface(&path, "NetA", "00:11:22:33:44:55").unwrap();
    let info = builder.info(&path).unwrap();

    assert_eq!(info.name, "vm-1");
    assert_eq!(info.cpus, 2);
    assert_eq!(info.memory_mb, 2048);
    assert!(!info.clean_shutdown);
    assert_eq!(
        info.nics,
        vec![NicInfo {
            network: "NetA".to_string(),
            mac: "00:11:22:33:44:55".to_string()
        }]
    );
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();

    let err = VmxBuilder::new()
        .set_resources(&dir.path().join("nope.vmx"), 1, 512)
        .unwrap_err();

    assert!(matches!(err, VmxError::Io { .. }));
}
