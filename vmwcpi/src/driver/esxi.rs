//! VMs on a standalone ESXi host, driven through govc

use std::{fs, path::Path, sync::Arc};

use async_trait::async_trait;
use log::{debug, info, warn};
use vmxcfg::{DiskInfo, NicInfo, VmInfo};

use super::{BootstrapParams, Driver, PowerOps, Timings, VmState};
use crate::{
    config::EsxiConfig,
    error::{Error, Result, WithContext},
    runner::Runner,
    tools::{
        govc::{self, Govc, GovcDevice, GovcEnv},
        GuestCredentials,
    },
};

/// Snapshot taken on imported stemcells, linked clones hang off it
const STEMCELL_SNAPSHOT: &str = "stemcell";

#[derive(Clone)]
pub struct GovcDriver {
    govc: Govc,
    timings: Timings,
}

fn disk_path(disk: &str) -> String {
    format!("disks/{}.vmdk", disk)
}

fn ephemeral_disk_path(name: &str) -> String {
    format!("ephemeral-disks/{}.vmdk", name)
}

fn env_iso_path(name: &str) -> String {
    format!("{}/env.iso", name)
}

/// Whether a backing like `[datastore1] disks/disk-1.vmdk` is the datastore path `path`
fn backed_by(device: &GovcDevice, path: &str) -> bool {
    match device.file_name() {
        Some(file) => {
            file == path
                || file.ends_with(&format!("] {}", path))
                || file.ends_with(&format!("/{}", path))
        }
        None => false,
    }
}

impl GovcDriver {
    pub fn new(config: &EsxiConfig, runner: Arc<dyn Runner>) -> Self {
        let env = GovcEnv {
            url: config.url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            insecure: config.insecure,
            datacenter: config.datacenter.clone(),
            datastore: config.datastore.clone(),
        };

        Self {
            govc: Govc::new(&config.govc_bin_path, env, runner),
            timings: config.timings(),
        }
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    async fn require_vm(&self, name: &str) -> Result<()> {
        match self.govc.vm_info(name).await? {
            Some(_) => Ok(()),
            None => Err(Error::VmNotFound(name.to_string())),
        }
    }

    async fn create_datastore_disk(&self, path: &str, size_mb: u64) -> Result<()> {
        if let Some((dir, _)) = path.rsplit_once('/') {
            self.govc.datastore_mkdir(dir).await?;
        }
        self.govc.datastore_disk_create(path, size_mb).await
    }
}

#[async_trait]
impl PowerOps for GovcDriver {
    async fn state(&self, name: &str) -> Result<VmState> {
        self.vm_state(name).await
    }

    async fn power_on(&self, name: &str) -> Result<()> {
        self.govc.power(name, &["-on"]).await
    }

    async fn soft_stop(&self, name: &str) -> Result<()> {
        self.govc.power(name, &["-s"]).await
    }

    async fn hard_stop(&self, name: &str) -> Result<()> {
        self.govc.power(name, &["-off", "-force"]).await
    }

    async fn stopped_cleanly(&self, name: &str) -> Result<bool> {
        Ok(self.vm_state(name).await? != VmState::PoweredOn)
    }

    async fn guest_processes(&self, name: &str, credentials: &GuestCredentials) -> Result<String> {
        self.govc.guest_ps(name, credentials).await
    }

    async fn copy_to_guest(
        &self,
        name: &str,
        credentials: &GuestCredentials,
        host_path: &Path,
        guest_path: &str,
    ) -> Result<()> {
        self.govc
            .guest_upload(name, credentials, host_path, guest_path)
            .await
    }

    async fn run_in_guest(
        &self,
        name: &str,
        credentials: &GuestCredentials,
        program: &str,
        args: &[String],
    ) -> Result<()> {
        self.govc.guest_run(name, credentials, program, args).await
    }

    fn tools_not_running(&self, err: &Error) -> bool {
        govc::is_tools_not_running(err)
    }
}

#[async_trait]
impl Driver for GovcDriver {
    async fn import_image(&self, ovf: &Path, name: &str) -> Result<()> {
        info!("Importing {} as {}", ovf.to_string_lossy(), name);
        self.govc
            .import_ovf(ovf, name)
            .await
            .with_context(|| format!("importing {}", name))?;
        self.govc
            .snapshot_create(name, STEMCELL_SNAPSHOT)
            .await
            .with_context(|| format!("snapshotting {}", name))
    }

    async fn clone_vm(&self, source: &str, target: &str) -> Result<()> {
        self.require_vm(source).await?;
        info!("Cloning {} into {}", source, target);

        self.govc
            .clone_vm(source, target, Some(STEMCELL_SNAPSHOT))
            .await
            .with_context(|| format!("cloning {}", source))?;
        self.govc
            .change(
                target,
                &[
                    "-nested-hv-enabled=true".to_string(),
                    "-sync-time-with-host=true".to_string(),
                ],
            )
            .await
            .with_context(|| format!("configuring {}", target))
    }

    async fn vm_state(&self, name: &str) -> Result<VmState> {
        Ok(match self.govc.vm_info(name).await? {
            None => VmState::NotFound,
            Some(vm) if vm.powered_on() => VmState::PoweredOn,
            Some(_) => VmState::PoweredOff,
        })
    }

    async fn vm_info(&self, name: &str) -> Result<VmInfo> {
        let vm = self
            .govc
            .vm_info(name)
            .await?
            .ok_or_else(|| Error::VmNotFound(name.to_string()))?;
        let devices = self.govc.devices(name).await?;
        let hardware = vm.config.clone().unwrap_or_default().hardware;

        Ok(VmInfo {
            name: vm.name.clone(),
            cpus: hardware.num_cpu,
            memory_mb: hardware.memory_mb,
            clean_shutdown: !vm.powered_on(),
            nics: devices
                .iter()
                .filter_map(|d| {
                    let mac = d.mac_address.clone()?;
                    let network = d
                        .backing
                        .as_ref()
                        .and_then(|b| b.device_name.clone())
                        .unwrap_or_default();
                    Some(NicInfo { network, mac })
                })
                .collect(),
            disks: devices
                .iter()
                .filter(|d| d.kind == "VirtualDisk")
                .map(|d| DiskInfo {
                    slot: d.name.clone(),
                    path: d.file_name().unwrap_or_default().to_string(),
                })
                .collect(),
        })
    }

    async fn set_resources(&self, name: &str, cpus: u32, memory_mb: u32) -> Result<()> {
        self.govc
            .change(name, &[format!("-c={}", cpus), format!("-m={}", memory_mb)])
            .await
    }

    /// ESXi names are the VM identity, so the readable name goes into the annotation
    async fn set_display_name(&self, name: &str, display_name: &str) -> Result<()> {
        self.govc
            .change(name, &[format!("-annotation={}", display_name)])
            .await
    }

    async fn add_network_interface(&self, name: &str, network: &str, mac: &str) -> Result<()> {
        self.govc.network_add(name, network, mac).await
    }

    async fn start_vm(&self, name: &str) -> Result<()> {
        super::start(self, &self.timings, name).await
    }

    async fn stop_vm(&self, name: &str) -> Result<()> {
        super::stop(self, &self.timings, name).await
    }

    async fn destroy_vm(&self, name: &str) -> Result<()> {
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
            self.govc
                .destroy(name)
                .await
                .with_context(|| format!("deleting {}", name))?;
        }

        let ephemeral = ephemeral_disk_path(name);
        match self.govc.datastore_exists(&ephemeral).await {
            Ok(true) => {
                if let Err(e) = self.govc.datastore_rm(&ephemeral).await {
                    warn!("Could not remove ephemeral disk {}: {}", ephemeral, e);
                }
            }
            Ok(false) => {}
            Err(e) => warn!("Could not check ephemeral disk {}: {}", ephemeral, e),
        }
        Ok(())
    }

    async fn bootstrap_vm(&self, name: &str, params: &BootstrapParams) -> Result<()> {
        super::bootstrap(self, &self.timings, name, params).await
    }

    async fn create_disk(&self, disk: &str, size_mb: u64) -> Result<()> {
        self.create_datastore_disk(&disk_path(disk), size_mb)
            .await
            .with_context(|| format!("creating {}", disk))
    }

    async fn destroy_disk(&self, disk: &str) -> Result<()> {
        let path = disk_path(disk);
        if self.govc.datastore_exists(&path).await? {
            self.govc.datastore_rm(&path).await
        } else {
            debug!("{} already gone", disk);
            Ok(())
        }
    }

    async fn disk_exists(&self, disk: &str) -> Result<bool> {
        self.govc.datastore_exists(&disk_path(disk)).await
    }

    async fn attach_disk(&self, name: &str, disk: &str) -> Result<()> {
        self.require_vm(name).await?;
        if !self.disk_exists(disk).await? {
            return Err(Error::DiskNotFound(disk.to_string()));
        }
        self.govc.disk_attach(name, &disk_path(disk)).await
    }

    async fn detach_disk(&self, name: &str, disk: &str) -> Result<()> {
        let path = disk_path(disk);
        let devices = self.govc.devices(name).await?;
        match devices.iter().find(|d| backed_by(d, &path)) {
            Some(device) => self.govc.device_remove(name, &device.name).await,
            None => {
                debug!("{} is not attached to {}", disk, name);
                Ok(())
            }
        }
    }

    async fn attach_ephemeral_disk(&self, name: &str, size_mb: u64) -> Result<()> {
        let path = ephemeral_disk_path(name);
        self.create_datastore_disk(&path, size_mb)
            .await
            .with_context(|| format!("creating ephemeral disk for {}", name))?;
        self.govc.disk_attach(name, &path).await
    }

    async fn write_env_iso(&self, name: &str, iso: &[u8]) -> Result<()> {
        let local = tempfile::NamedTempFile::new().map_err(|e| Error::io("env.iso", e))?;
        fs::write(local.path(), iso).map_err(|e| Error::io(local.path(), e))?;

        let remote = env_iso_path(name);
        self.govc
            .datastore_upload(local.path(), &remote)
            .await
            .with_context(|| format!("uploading env iso of {}", name))?;

        let devices = self.govc.devices(name).await?;
        let cdrom = match devices.iter().find(|d| d.kind == "VirtualCdrom") {
            Some(device) => device.name.clone(),
            None => self.govc.cdrom_add(name).await?,
        };
        self.govc.cdrom_insert(name, &cdrom, &remote).await
    }

    async fn read_env_iso(&self, name: &str) -> Result<Vec<u8>> {
        let dir = tempfile::tempdir().map_err(|e| Error::io("env.iso", e))?;
        let local = dir.path().join("env.iso");
        self.govc
            .datastore_download(&env_iso_path(name), &local)
            .await
            .with_context(|| format!("downloading env iso of {}", name))?;
        fs::read(&local).map_err(|e| Error::io(&local, e))
    }
}
