use std::path::Path;

use log::info;
use serde_json::Value;
use vmxcfg::VmInfo;

use super::Cpi;
use crate::{
    agent::{scsi_device_path, AgentEnv},
    cloudprops::DiskCloudProperties,
    error::{Error, Result, WithContext},
    ids,
};

/// Position of `disk` among the VM's SCSI disks
fn disk_position(info: &VmInfo, disk: &str) -> Option<usize> {
    info.disks.iter().position(|d| {
        Path::new(&d.path)
            .file_stem()
            .map_or(false, |stem| stem == disk)
    })
}

impl Cpi {
    pub(crate) async fn create_disk(&self, size_mb: u64, cloud_properties: &Value) -> Result<Value> {
        DiskCloudProperties::from_value(cloud_properties)?;

        let cid = ids::new_cid();
        let disk = ids::disk_name(&cid);
        info!("Creating {} of {} MB", disk, size_mb);
        self.driver.create_disk(&disk, size_mb).await?;
        Ok(Value::String(cid))
    }

    pub(crate) async fn delete_disk(&self, disk_cid: &str) -> Result<Value> {
        self.driver.destroy_disk(&ids::disk_name(disk_cid)).await?;
        Ok(Value::Null)
    }

    pub(crate) async fn has_disk(&self, disk_cid: &str) -> Result<Value> {
        Ok(Value::Bool(
            self.driver.disk_exists(&ids::disk_name(disk_cid)).await?,
        ))
    }

    /// Attach with the VM stopped and record the guest device in the agent settings.
    /// Returns the device path.
    pub(crate) async fn attach_disk(&self, vm_cid: &str, disk_cid: &str) -> Result<String> {
        let vm = ids::vm_name(vm_cid);
        let disk = ids::disk_name(disk_cid);
        self.require_vm(&vm).await?;
        if !self.driver.disk_exists(&disk).await? {
            return Err(Error::DiskNotFound(disk));
        }

        let was_running = self.is_running(&vm).await?;
        if was_running {
            self.driver.stop_vm(&vm).await?;
        }

        info!("Attaching {} to {}", disk, vm);
        self.driver
            .attach_disk(&vm, &disk)
            .await
            .with_context(|| format!("attaching {} to {}", disk, vm))?;

        let info = self.driver.vm_info(&vm).await?;
        let position =
            disk_position(&info, &disk).ok_or_else(|| Error::DiskNotFound(disk.clone()))?;
        let path = scsi_device_path(position);

        let mut env = AgentEnv::from_iso(&self.driver.read_env_iso(&vm).await?)?;
        env.attach_persistent_disk(disk_cid, path.clone());
        self.driver.write_env_iso(&vm, &env.to_iso()?).await?;

        if was_running {
            self.driver.start_vm(&vm).await?;
        }
        Ok(path)
    }

    pub(crate) async fn detach_disk(&self, vm_cid: &str, disk_cid: &str) -> Result<Value> {
        let vm = ids::vm_name(vm_cid);
        let disk = ids::disk_name(disk_cid);
        self.require_vm(&vm).await?;

        let was_running = self.is_running(&vm).await?;
        if was_running {
            self.driver.stop_vm(&vm).await?;
        }

        info!("Detaching {} from {}", disk, vm);
        self.driver
            .detach_disk(&vm, &disk)
            .await
            .with_context(|| format!("detaching {} from {}", disk, vm))?;

        let mut env = AgentEnv::from_iso(&self.driver.read_env_iso(&vm).await?)?;
        env.detach_persistent_disk(disk_cid);
        self.driver.write_env_iso(&vm, &env.to_iso()?).await?;

        if was_running {
            self.driver.start_vm(&vm).await?;
        }
        Ok(Value::Null)
    }

    /// Cids of the persistent disks attached to a VM
    pub(crate) async fn get_disks(&self, vm_cid: &str) -> Result<Value> {
        let vm = ids::vm_name(vm_cid);
        self.require_vm(&vm).await?;

        let info = self.driver.vm_info(&vm).await?;
        Ok(Value::Array(
            info.disks
                .iter()
                .filter_map(|d| Path::new(&d.path).file_stem()?.to_str())
                .filter_map(ids::disk_cid)
                .map(|cid| Value::String(cid.to_string()))
                .collect(),
        ))
    }
}
