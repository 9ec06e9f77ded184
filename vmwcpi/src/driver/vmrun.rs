//! Workstation and Fusion VMs kept as vmx directories in a local store

use std::{
    fs::{self, create_dir_all, remove_dir_all, remove_file},
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, info, warn};
use vmxcfg::{VmInfo, VmxBuilder};

use super::{BootstrapParams, Driver, PowerOps, Timings, VmState};
use crate::{
    config::VmrunConfig,
    error::{Error, Result, WithContext},
    runner::Runner,
    tools::{
        ovftool::Ovftool,
        vdiskmanager::Vdiskmanager,
        vmrun::{self, StopMode, Vmrun},
        GuestCredentials,
    },
};

#[derive(Clone)]
pub struct VmrunDriver {
    store: PathBuf,
    vmrun: Vmrun,
    ovftool: Ovftool,
    vdiskmanager: Vdiskmanager,
    builder: VmxBuilder,
    linked_clones: bool,
    timings: Timings,
}

impl VmrunDriver {
    pub fn new(config: &VmrunConfig, runner: Arc<dyn Runner>) -> Self {
        let mut builder = VmxBuilder::new().optimized(config.optimize_vmx);
        if config.vmx_lock_timeout_seconds > 0 {
            builder = builder.lock_timeout(Duration::from_secs(config.vmx_lock_timeout_seconds));
        }

        Self {
            store: config.vm_store_path.clone(),
            vmrun: Vmrun::new(&config.vmrun_bin_path, config.vmrun_host_type, runner.clone()),
            ovftool: Ovftool::new(&config.ovftool_bin_path, runner.clone()),
            vdiskmanager: Vdiskmanager::new(&config.vdiskmanager_bin_path, runner),
            builder,
            linked_clones: config.use_linked_cloning,
            timings: config.timings(),
        }
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    fn vm_dir(&self, name: &str) -> PathBuf {
        self.store.join(name)
    }

    pub fn vmx_path(&self, name: &str) -> PathBuf {
        self.vm_dir(name).join(format!("{}.vmx", name))
    }

    fn disk_path(&self, disk: &str) -> PathBuf {
        self.store.join("disks").join(format!("{}.vmdk", disk))
    }

    fn ephemeral_disk_path(&self, name: &str) -> PathBuf {
        self.store
            .join("ephemeral-disks")
            .join(format!("{}.vmdk", name))
    }

    fn env_iso_path(&self, name: &str) -> PathBuf {
        self.vm_dir(name).join("env.iso")
    }

    /// The vmx of an existing VM, or `VmNotFound`
    fn existing_vmx(&self, name: &str) -> Result<PathBuf> {
        let vmx = self.vmx_path(name);
        if vmx.exists() {
            Ok(vmx)
        } else {
            Err(Error::VmNotFound(name.to_string()))
        }
    }

    async fn is_running(&self, vmx: &Path) -> Result<bool> {
        let running = self.vmrun.list().await?;
        Ok(running.iter().any(|p| same_file(p, vmx)))
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn create_dir(path: &Path) -> Result<()> {
    create_dir_all(path).map_err(|e| Error::io(path, e))
}

#[async_trait]
impl PowerOps for VmrunDriver {
    async fn state(&self, name: &str) -> Result<VmState> {
        self.vm_state(name).await
    }

    async fn power_on(&self, name: &str) -> Result<()> {
        self.vmrun.start(&self.existing_vmx(name)?).await
    }

    async fn soft_stop(&self, name: &str) -> Result<()> {
        self.vmrun.stop(&self.vmx_path(name), StopMode::Soft).await
    }

    async fn hard_stop(&self, name: &str) -> Result<()> {
        self.vmrun.stop(&self.vmx_path(name), StopMode::Hard).await
    }

    async fn stopped_cleanly(&self, name: &str) -> Result<bool> {
        Ok(self.builder.info(&self.vmx_path(name))?.clean_shutdown)
    }

    async fn guest_processes(&self, name: &str, credentials: &GuestCredentials) -> Result<String> {
        self.vmrun
            .list_processes_in_guest(&self.vmx_path(name), credentials)
            .await
    }

    async fn copy_to_guest(
        &self,
        name: &str,
        credentials: &GuestCredentials,
        host_path: &Path,
        guest_path: &str,
    ) -> Result<()> {
        self.vmrun
            .copy_file_to_guest(&self.vmx_path(name), credentials, host_path, guest_path)
            .await
    }

    async fn run_in_guest(
        &self,
        name: &str,
        credentials: &GuestCredentials,
        program: &str,
        args: &[String],
    ) -> Result<()> {
        self.vmrun
            .run_program_in_guest(&self.vmx_path(name), credentials, program, args)
            .await
    }

    fn tools_not_running(&self, err: &Error) -> bool {
        vmrun::is_tools_not_running(err)
    }
}

#[async_trait]
impl Driver for VmrunDriver {
    async fn import_image(&self, ovf: &Path, name: &str) -> Result<()> {
        info!("Importing {} as {}", ovf.to_string_lossy(), name);
        create_dir(&self.vm_dir(name))?;
        self.ovftool
            .import(ovf, &self.vmx_path(name), name)
            .await
            .with_context(|| format!("importing {}", name))
    }

    async fn clone_vm(&self, source: &str, target: &str) -> Result<()> {
        let source_vmx = self.existing_vmx(source)?;
        let target_vmx = self.vmx_path(target);
        info!("Cloning {} into {}", source, target);

        create_dir(&self.vm_dir(target))?;
        self.vmrun
            .clone(&source_vmx, &target_vmx, self.linked_clones, target)
            .await
            .with_context(|| format!("cloning {}", source))?;
        self.builder
            .init_hardware(&target_vmx)
            .with_context(|| format!("configuring {}", target))
    }

    async fn vm_state(&self, name: &str) -> Result<VmState> {
        let vmx = self.vmx_path(name);
        if !vmx.exists() {
            return Ok(VmState::NotFound);
        }
        if self.is_running(&vmx).await? {
            Ok(VmState::PoweredOn)
        } else {
            Ok(VmState::PoweredOff)
        }
    }

    async fn vm_info(&self, name: &str) -> Result<VmInfo> {
        Ok(self.builder.info(&self.existing_vmx(name)?)?)
    }

    async fn set_resources(&self, name: &str, cpus: u32, memory_mb: u32) -> Result<()> {
        Ok(self
            .builder
            .set_resources(&self.existing_vmx(name)?, cpus, memory_mb)?)
    }

    async fn set_display_name(&self, name: &str, display_name: &str) -> Result<()> {
        Ok(self
            .builder
            .set_display_name(&self.existing_vmx(name)?, display_name)?)
    }

    async fn add_network_interface(&self, name: &str, network: &str, mac: &str) -> Result<()> {
        Ok(self
            .builder
            .add_network_interface(&self.existing_vmx(name)?, network, mac)?)
    }

    async fn start_vm(&self, name: &str) -> Result<()> {
        super::start(self, &self.timings, name).await
    }

    async fn stop_vm(&self, name: &str) -> Result<()> {
        super::stop(self, &self.timings, name).await
    }

    async fn destroy_vm(&self, name: &str) -> Result<()> {
        let vmx = self.vmx_path(name);
        let mut state = self.vm_state(name).await?;

        if state == VmState::PoweredOn {
            info!("Powering off {}", name);
            self.hard_stop(name)
                .await
                .with_context(|| format!("powering off {}", name))?;
            state = self.vm_state(name).await?;
        }

        if state == VmState::PoweredOff {
            info!("Deleting {}", name);
            self.vmrun
                .delete_vm(&vmx)
                .await
                .with_context(|| format!("deleting {}", name))?;
        }

        let dir = self.vm_dir(name);
        if dir.exists() {
            if let Err(e) = remove_dir_all(&dir) {
                warn!("Could not remove {}: {}", dir.to_string_lossy(), e);
            }
        }

        let ephemeral = self.ephemeral_disk_path(name);
        if let Err(e) = remove_file(&ephemeral) {
            if e.kind() != ErrorKind::NotFound {
                warn!(
                    "Could not remove ephemeral disk {}: {}",
                    ephemeral.to_string_lossy(),
                    e
                );
            }
        }
        Ok(())
    }

    async fn bootstrap_vm(&self, name: &str, params: &BootstrapParams) -> Result<()> {
        super::bootstrap(self, &self.timings, name, params).await
    }

    async fn create_disk(&self, disk: &str, size_mb: u64) -> Result<()> {
        let path = self.disk_path(disk);
        if let Some(parent) = path.parent() {
            create_dir(parent)?;
        }
        self.vdiskmanager
            .create(&path, size_mb)
            .await
            .with_context(|| format!("creating {}", disk))
    }

    async fn destroy_disk(&self, disk: &str) -> Result<()> {
        let path = self.disk_path(disk);
        match remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} already gone", disk);
                Ok(())
            }
            Err(e) => Err(Error::io(path, e)),
        }
    }

    async fn disk_exists(&self, disk: &str) -> Result<bool> {
        Ok(self.disk_path(disk).exists())
    }

    async fn attach_disk(&self, name: &str, disk: &str) -> Result<()> {
        let vmx = self.existing_vmx(name)?;
        let path = self.disk_path(disk);
        if !path.exists() {
            return Err(Error::DiskNotFound(disk.to_string()));
        }
        let slot = self.builder.attach_disk(&vmx, &path_str(&path))?;
        debug!("Attached {} to {} at {}", disk, name, slot);
        Ok(())
    }

    async fn detach_disk(&self, name: &str, disk: &str) -> Result<()> {
        let vmx = self.existing_vmx(name)?;
        Ok(self
            .builder
            .detach_disk(&vmx, &path_str(&self.disk_path(disk)))?)
    }

    async fn attach_ephemeral_disk(&self, name: &str, size_mb: u64) -> Result<()> {
        let vmx = self.existing_vmx(name)?;
        let path = self.ephemeral_disk_path(name);
        if let Some(parent) = path.parent() {
            create_dir(parent)?;
        }
        self.vdiskmanager
            .create(&path, size_mb)
            .await
            .with_context(|| format!("creating ephemeral disk for {}", name))?;
        self.builder.attach_disk(&vmx, &path_str(&path))?;
        Ok(())
    }

    async fn write_env_iso(&self, name: &str, iso: &[u8]) -> Result<()> {
        let vmx = self.existing_vmx(name)?;
        let path = self.env_iso_path(name);
        fs::write(&path, iso).map_err(|e| Error::io(&path, e))?;
        Ok(self.builder.attach_cdrom(&vmx, &path_str(&path))?)
    }

    async fn read_env_iso(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.env_iso_path(name);
        fs::read(&path).map_err(|e| Error::io(&path, e))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        driver::test_timings,
        runner::{testing::FakeRunner, Invocation},
        tools::vmrun::HostType,
    };

    const STEMCELL_VMX: &str = r#".encoding = "UTF-8"
displayName = "cs-1"
guestOS = "ubuntu-64"
numvcpus = "1"
memsize = "512"
scsi0.present = "TRUE"
scsi0.virtualDev = "lsilogic"
scsi0:0.present = "TRUE"
scsi0:0.fileName = "image-disk1.vmdk"
"#;

    fn config(store: &Path) -> VmrunConfig {
        VmrunConfig {
            vm_store_path: store.to_path_buf(),
            vmrun_bin_path: PathBuf::from("vmrun"),
            ovftool_bin_path: PathBuf::from("ovftool"),
            vdiskmanager_bin_path: PathBuf::from("vmware-vdiskmanager"),
            vmrun_host_type: HostType::Ws,
            vm_start_max_wait_seconds: 600,
            vm_soft_shutdown_max_wait_seconds: 30,
            use_linked_cloning: true,
            enable_human_readable_name: false,
            optimize_vmx: false,
            vmx_lock_timeout_seconds: 0,
        }
    }

    /// A runner that behaves like vmrun for clone and reports `running` as the VM list
    fn fake_vmrun(running: Arc<Mutex<Vec<String>>>) -> FakeRunner {
        FakeRunner::new(move |i: &Invocation| {
            if i.has_arg("list") {
                let running = running.lock().unwrap();
                let mut out = format!("Total running VMs: {}\n", running.len());
                for vmx in running.iter() {
                    out.push_str(vmx);
                    out.push('\n');
                }
                Ok(out)
            } else if i.has_arg("clone") {
                fs::copy(&i.args[3], &i.args[4]).unwrap();
                Ok(String::new())
            } else {
                Ok(String::new())
            }
        })
    }

    fn write_stemcell(store: &Path) {
        create_dir_all(store.join("cs-1")).unwrap();
        fs::write(store.join("cs-1").join("cs-1.vmx"), STEMCELL_VMX).unwrap();
    }

    #[tokio::test]
    async fn test_destroy_missing_vm_twice() {
        let store = tempfile::tempdir().unwrap();
        let runner = FakeRunner::ok().shared();
        let driver = VmrunDriver::new(&config(store.path()), runner.clone());

        driver.destroy_vm("vm-missing").await.unwrap();
        driver.destroy_vm("vm-missing").await.unwrap();
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_clone_and_configure() {
        let store = tempfile::tempdir().unwrap();
        write_stemcell(store.path());
        let runner = fake_vmrun(Arc::new(Mutex::new(Vec::new()))).shared();
        let driver = VmrunDriver::new(&config(store.path()), runner.clone());

        driver.clone_vm("cs-1", "vm-1").await.unwrap();
        driver
            .add_network_interface("vm-1", "NetA", "00:11:22:33:44:55")
            .await
            .unwrap();
        driver.set_resources("vm-1", 2, 2048).await.unwrap();

        let info = driver.vm_info("vm-1").await.unwrap();
        assert_eq!(info.nics.len(), 1);
        assert_eq!(info.nics[0].network, "NetA");
        assert_eq!(info.nics[0].mac, "00:11:22:33:44:55");
        assert_eq!(info.cpus, 2);
        assert_eq!(info.memory_mb, 2048);

        let vmx = driver.builder.load(&driver.vmx_path("vm-1")).unwrap();
        assert_eq!(vmx.vhv_enable, Some(true));
        assert_eq!(vmx.tools_sync_time, Some(true));
        assert_eq!(vmx.get("guestOS"), Some("ubuntu-64"));
        assert_eq!(runner.count(&["clone", "linked", "-cloneName=vm-1"]), 1);
        assert_eq!(driver.vm_state("vm-1").await.unwrap(), VmState::PoweredOff);
    }

    #[tokio::test]
    async fn test_clone_missing_source() {
        let store = tempfile::tempdir().unwrap();
        let driver = VmrunDriver::new(&config(store.path()), FakeRunner::ok().shared());

        let err = driver.clone_vm("cs-missing", "vm-1").await.unwrap_err();
        assert!(matches!(err, Error::VmNotFound(_)));
    }

    #[tokio::test]
    async fn test_soft_stop_escalates_to_one_hard_stop() {
        let store = tempfile::tempdir().unwrap();
        write_stemcell(store.path());
        let vmx = path_str(&store.path().join("cs-1").join("cs-1.vmx"));
        let runner = fake_vmrun(Arc::new(Mutex::new(vec![vmx])))
            .delay("soft", Duration::from_secs(5))
            .shared();
        let driver = VmrunDriver::new(&config(store.path()), runner.clone())
            .with_timings(test_timings());

        driver.stop_vm("cs-1").await.unwrap();

        assert_eq!(runner.count(&["stop", "soft"]), 1);
        assert_eq!(runner.count(&["stop", "hard"]), 1);
    }

    #[tokio::test]
    async fn test_soft_stop_clean_shutdown() {
        let store = tempfile::tempdir().unwrap();
        create_dir_all(store.path().join("vm-1")).unwrap();
        let vmx = store.path().join("vm-1").join("vm-1.vmx");
        fs::write(&vmx, "cleanShutdown = \"FALSE\"\n").unwrap();

        let listing = format!("Total running VMs: 1\n{}\n", path_str(&vmx));
        let guest_vmx = vmx.clone();
        let runner = FakeRunner::new(move |i: &Invocation| {
            if i.has_arg("list") {
                return Ok(listing.clone());
            }
            if i.has_arg("soft") {
                fs::write(&guest_vmx, "cleanShutdown = \"TRUE\"\n").unwrap();
            }
            Ok(String::new())
        })
        .shared();
        let driver = VmrunDriver::new(&config(store.path()), runner.clone())
            .with_timings(test_timings());

        driver.stop_vm("vm-1").await.unwrap();
        assert_eq!(runner.count(&["stop", "soft"]), 1);
        assert_eq!(runner.count(&["stop", "hard"]), 0);
    }

    #[tokio::test]
    async fn test_start_timeout_issues_no_more_power_commands() {
        let store = tempfile::tempdir().unwrap();
        write_stemcell(store.path());
        let runner = fake_vmrun(Arc::new(Mutex::new(Vec::new()))).shared();
        let driver = VmrunDriver::new(&config(store.path()), runner.clone())
            .with_timings(test_timings());

        let err = driver.start_vm("cs-1").await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        assert_eq!(runner.count(&["start"]), 1);
        assert_eq!(runner.count(&["stop"]), 0);
        assert!(runner.count(&["list"]) > 1);
    }

    #[tokio::test]
    async fn test_disks_and_env_iso() {
        let store = tempfile::tempdir().unwrap();
        write_stemcell(store.path());
        let runner = FakeRunner::new(|i: &Invocation| {
            if i.has_arg("-c") {
                fs::write(i.args.last().unwrap(), b"vmdk").unwrap();
            }
            Ok("Total running VMs: 0\n".to_string())
        })
        .shared();
        let driver = VmrunDriver::new(&config(store.path()), runner);

        driver.create_disk("disk-1", 1024).await.unwrap();
        assert!(driver.disk_exists("disk-1").await.unwrap());

        driver.attach_ephemeral_disk("cs-1", 4096).await.unwrap();
        driver.attach_disk("cs-1", "disk-1").await.unwrap();
        let disks = driver.vm_info("cs-1").await.unwrap().disks;
        assert_eq!(disks.len(), 3);
        assert!(disks[1].path.ends_with("ephemeral-disks/cs-1.vmdk"));
        assert!(disks[2].path.ends_with("disks/disk-1.vmdk"));

        driver.detach_disk("cs-1", "disk-1").await.unwrap();
        assert_eq!(driver.vm_info("cs-1").await.unwrap().disks.len(), 2);

        let err = driver.attach_disk("cs-1", "disk-2").await.unwrap_err();
        assert!(matches!(err, Error::DiskNotFound(_)));

        driver.write_env_iso("cs-1", b"iso bytes").await.unwrap();
        assert_eq!(driver.read_env_iso("cs-1").await.unwrap(), b"iso bytes");
        let vmx = driver.builder.load(&driver.vmx_path("cs-1")).unwrap();
        assert_eq!(vmx.ide_devices.len(), 1);

        driver.destroy_disk("disk-1").await.unwrap();
        driver.destroy_disk("disk-1").await.unwrap();
        assert!(!driver.disk_exists("disk-1").await.unwrap());
    }
}
