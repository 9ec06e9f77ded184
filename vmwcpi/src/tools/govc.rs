//! `govc` for standalone ESXi hosts
//!
//! Connection settings and guest credentials are passed through the `GOVC_*`
//! environment rather than the command line.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Deserialize;

use super::GuestCredentials;
use crate::{
    error::{Error, Result},
    runner::{Invocation, Runner},
};

/// Connection settings exported to every govc invocation
#[derive(Clone, Debug, Default)]
pub struct GovcEnv {
    pub url: String,
    pub username: String,
    pub password: String,
    pub insecure: bool,
    pub datacenter: String,
    pub datastore: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct GovcHardware {
    #[serde(rename = "NumCPU", alias = "numCPU", default)]
    pub num_cpu: u32,
    #[serde(rename = "MemoryMB", alias = "memoryMB", default)]
    pub memory_mb: u32,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct GovcVmConfig {
    #[serde(rename = "Hardware", alias = "hardware", default)]
    pub hardware: GovcHardware,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct GovcRuntime {
    #[serde(rename = "PowerState", alias = "powerState", default)]
    pub power_state: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GovcVm {
    #[serde(rename = "Name", alias = "name")]
    pub name: String,
    #[serde(rename = "Config", alias = "config", default)]
    pub config: Option<GovcVmConfig>,
    #[serde(rename = "Runtime", alias = "runtime", default)]
    pub runtime: GovcRuntime,
}

impl GovcVm {
    pub fn powered_on(&self) -> bool {
        self.runtime.power_state == "poweredOn"
    }
}

#[derive(Deserialize, Debug)]
struct VmInfoOutput {
    #[serde(rename = "VirtualMachines", alias = "virtualMachines", default)]
    virtual_machines: Option<Vec<GovcVm>>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct GovcBacking {
    #[serde(rename = "FileName", alias = "fileName", default)]
    pub file_name: Option<String>,
    #[serde(rename = "DeviceName", alias = "deviceName", default)]
    pub device_name: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GovcDevice {
    #[serde(rename = "Name", alias = "name")]
    pub name: String,
    #[serde(rename = "Type", alias = "type", default)]
    pub kind: String,
    #[serde(rename = "Backing", alias = "backing", default)]
    pub backing: Option<GovcBacking>,
    #[serde(rename = "MacAddress", alias = "macAddress", default)]
    pub mac_address: Option<String>,
}

impl GovcDevice {
    pub fn file_name(&self) -> Option<&str> {
        self.backing.as_ref()?.file_name.as_deref()
    }
}

#[derive(Deserialize, Debug)]
struct DeviceInfoOutput {
    #[serde(rename = "Devices", alias = "devices", default)]
    devices: Option<Vec<GovcDevice>>,
}

#[derive(Clone)]
pub struct Govc {
    bin: PathBuf,
    env: GovcEnv,
    runner: Arc<dyn Runner>,
}

impl Govc {
    pub fn new(bin: impl Into<PathBuf>, env: GovcEnv, runner: Arc<dyn Runner>) -> Self {
        Self {
            bin: bin.into(),
            env,
            runner,
        }
    }

    fn command(&self, command: &str) -> Invocation {
        Invocation::new(&self.bin)
            .arg(command)
            .env("GOVC_URL", &self.env.url)
            .env("GOVC_USERNAME", &self.env.username)
            .env("GOVC_PASSWORD", &self.env.password)
            .env("GOVC_INSECURE", if self.env.insecure { "1" } else { "0" })
            .env("GOVC_DATACENTER", &self.env.datacenter)
            .env("GOVC_DATASTORE", &self.env.datastore)
    }

    fn guest_command(&self, command: &str, credentials: &GuestCredentials) -> Invocation {
        self.command(command).env(
            "GOVC_GUEST_LOGIN",
            format!("{}:{}", credentials.username, credentials.password),
        )
    }

    async fn run(&self, invocation: Invocation) -> Result<String> {
        self.runner.run(&invocation).await
    }

    pub async fn import_ovf(&self, ovf: &Path, name: &str) -> Result<()> {
        self.run(
            self.command("import.ovf")
                .arg(format!("-name={}", name))
                .arg(ovf.to_string_lossy()),
        )
        .await?;
        Ok(())
    }

    pub async fn snapshot_create(&self, vm: &str, snapshot: &str) -> Result<()> {
        self.run(
            self.command("snapshot.create")
                .arg(format!("-vm={}", vm))
                .arg(snapshot),
        )
        .await?;
        Ok(())
    }

    /// Clone powered off, linked to `snapshot` when one is given
    pub async fn clone_vm(&self, source: &str, target: &str, snapshot: Option<&str>) -> Result<()> {
        let mut invocation = self
            .command("vm.clone")
            .arg(format!("-vm={}", source))
            .arg("-on=false");
        if let Some(snapshot) = snapshot {
            invocation = invocation
                .arg("-link=true")
                .arg(format!("-snapshot={}", snapshot));
        }
        self.run(invocation.arg(target)).await?;
        Ok(())
    }

    /// `None` when no VM has that name
    pub async fn vm_info(&self, vm: &str) -> Result<Option<GovcVm>> {
        let output = self
            .run(self.command("vm.info").arg("-json").arg(vm))
            .await?;
        let info: VmInfoOutput = serde_json::from_str(&output)?;
        Ok(info
            .virtual_machines
            .unwrap_or_default()
            .into_iter()
            .find(|v| v.name == vm))
    }

    pub async fn change(&self, vm: &str, flags: &[String]) -> Result<()> {
        self.run(
            self.command("vm.change")
                .arg(format!("-vm={}", vm))
                .args(flags.iter().cloned()),
        )
        .await?;
        Ok(())
    }

    pub async fn power(&self, vm: &str, flags: &[&str]) -> Result<()> {
        self.run(self.command("vm.power").args(flags.iter().copied()).arg(vm))
            .await?;
        Ok(())
    }

    pub async fn destroy(&self, vm: &str) -> Result<()> {
        self.run(self.command("vm.destroy").arg(vm)).await?;
        Ok(())
    }

    pub async fn network_add(&self, vm: &str, network: &str, mac: &str) -> Result<()> {
        self.run(
            self.command("vm.network.add")
                .arg(format!("-vm={}", vm))
                .arg(format!("-net={}", network))
                .arg("-net.adapter=vmxnet3")
                .arg(format!("-net.address={}", mac)),
        )
        .await?;
        Ok(())
    }

    pub async fn devices(&self, vm: &str) -> Result<Vec<GovcDevice>> {
        let output = self
            .run(
                self.command("device.info")
                    .arg("-json")
                    .arg(format!("-vm={}", vm)),
            )
            .await?;
        let info: DeviceInfoOutput = serde_json::from_str(&output)?;
        Ok(info.devices.unwrap_or_default())
    }

    /// Remove a device, keeping any backing file
    pub async fn device_remove(&self, vm: &str, device: &str) -> Result<()> {
        self.run(
            self.command("device.remove")
                .arg(format!("-vm={}", vm))
                .arg("-keep")
                .arg(device),
        )
        .await?;
        Ok(())
    }

    /// Add a cdrom drive and return its device name
    pub async fn cdrom_add(&self, vm: &str) -> Result<String> {
        let output = self
            .run(self.command("device.cdrom.add").arg(format!("-vm={}", vm)))
            .await?;
        Ok(output.trim().to_string())
    }

    pub async fn cdrom_insert(&self, vm: &str, device: &str, iso: &str) -> Result<()> {
        self.run(
            self.command("device.cdrom.insert")
                .arg(format!("-vm={}", vm))
                .arg(format!("-device={}", device))
                .arg(iso),
        )
        .await?;
        Ok(())
    }

    /// Attach an existing datastore disk as an independent, unlinked disk
    pub async fn disk_attach(&self, vm: &str, disk: &str) -> Result<()> {
        self.run(
            self.command("vm.disk.attach")
                .arg(format!("-vm={}", vm))
                .arg(format!("-disk={}", disk))
                .arg("-link=false"),
        )
        .await?;
        Ok(())
    }

    pub async fn datastore_mkdir(&self, path: &str) -> Result<()> {
        self.run(self.command("datastore.mkdir").arg("-p").arg(path))
            .await?;
        Ok(())
    }

    pub async fn datastore_disk_create(&self, path: &str, size_mb: u64) -> Result<()> {
        self.run(
            self.command("datastore.disk.create")
                .arg(format!("-size={}MB", size_mb))
                .arg(path),
        )
        .await?;
        Ok(())
    }

    pub async fn datastore_rm(&self, path: &str) -> Result<()> {
        self.run(self.command("datastore.rm").arg("-f").arg(path))
            .await?;
        Ok(())
    }

    pub async fn datastore_exists(&self, path: &str) -> Result<bool> {
        match self.run(self.command("datastore.ls").arg(path)).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn datastore_upload(&self, local: &Path, remote: &str) -> Result<()> {
        self.run(
            self.command("datastore.upload")
                .arg(local.to_string_lossy())
                .arg(remote),
        )
        .await?;
        Ok(())
    }

    pub async fn datastore_download(&self, remote: &str, local: &Path) -> Result<()> {
        self.run(
            self.command("datastore.download")
                .arg(remote)
                .arg(local.to_string_lossy()),
        )
        .await?;
        Ok(())
    }

    pub async fn guest_ps(&self, vm: &str, credentials: &GuestCredentials) -> Result<String> {
        self.run(
            self.guest_command("guest.ps", credentials)
                .arg(format!("-vm={}", vm)),
        )
        .await
    }

    pub async fn guest_upload(
        &self,
        vm: &str,
        credentials: &GuestCredentials,
        local: &Path,
        remote: &str,
    ) -> Result<()> {
        self.run(
            self.guest_command("guest.upload", credentials)
                .arg(format!("-vm={}", vm))
                .arg("-f")
                .arg(local.to_string_lossy())
                .arg(remote),
        )
        .await?;
        Ok(())
    }

    pub async fn guest_run(
        &self,
        vm: &str,
        credentials: &GuestCredentials,
        program: &str,
        args: &[String],
    ) -> Result<()> {
        self.run(
            self.guest_command("guest.run", credentials)
                .arg(format!("-vm={}", vm))
                .arg(program)
                .args(args.iter().cloned()),
        )
        .await?;
        Ok(())
    }
}

fn is_not_found(err: &Error) -> bool {
    match err.root() {
        Error::Command { stderr, .. } => {
            let stderr = stderr.to_lowercase();
            stderr.contains("not found") || stderr.contains("no such file")
        }
        _ => false,
    }
}

/// Guest operations fail this way until VMware Tools come up after boot
pub fn is_tools_not_running(err: &Error) -> bool {
    match err.root() {
        Error::Command { stderr, .. } => {
            let stderr = stderr.to_lowercase();
            stderr.contains("guest operations agent") || stderr.contains("tools are not running")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::FakeRunner;

    fn govc(runner: Arc<FakeRunner>) -> Govc {
        Govc::new(
            "govc",
            GovcEnv {
                url: "https://esxi.local/sdk".to_string(),
                username: "root".to_string(),
                password: "secret".to_string(),
                insecure: true,
                datacenter: "ha-datacenter".to_string(),
                datastore: "datastore1".to_string(),
            },
            runner,
        )
    }

    #[tokio::test]
    async fn test_vm_info_both_casings() {
        let runner = FakeRunner::new(|i| {
            if i.has_arg("vm-old") {
                Ok(r#"{"VirtualMachines":[{"Name":"vm-old","Config":{"Hardware":{"NumCPU":2,"MemoryMB":2048}},"Runtime":{"PowerState":"poweredOn"}}]}"#.to_string())
            } else if i.has_arg("vm-new") {
                Ok(r#"{"virtualMachines":[{"name":"vm-new","config":{"hardware":{"numCPU":1,"memoryMB":512}},"runtime":{"powerState":"poweredOff"}}]}"#.to_string())
            } else {
                Ok(r#"{"VirtualMachines":null}"#.to_string())
            }
        })
        .shared();
        let govc = govc(runner.clone());

        let old = govc.vm_info("vm-old").await.unwrap().unwrap();
        assert!(old.powered_on());
        assert_eq!(old.config.unwrap().hardware.memory_mb, 2048);

        let new = govc.vm_info("vm-new").await.unwrap().unwrap();
        assert!(!new.powered_on());
        assert_eq!(new.config.unwrap().hardware.num_cpu, 1);

        assert!(govc.vm_info("vm-missing").await.unwrap().is_none());

        let env = &runner.calls()[0].env;
        assert!(env.contains(&("GOVC_PASSWORD".to_string(), "secret".to_string())));
        assert!(env.contains(&("GOVC_INSECURE".to_string(), "1".to_string())));
    }

    #[tokio::test]
    async fn test_devices_and_guest_login() {
        let runner = FakeRunner::new(|i| {
            if i.has_arg("device.info") {
                Ok(r#"{"Devices":[
                    {"Name":"cdrom-3000","Type":"VirtualCdrom","Backing":{"FileName":"[datastore1] vm-1/env.iso"}},
                    {"Name":"ethernet-0","Type":"VirtualVmxnet3","Backing":{"DeviceName":"VM Network"},"MacAddress":"00:50:56:01:02:03"}
                ]}"#
                .to_string())
            } else {
                Ok(String::new())
            }
        })
        .shared();
        let govc = govc(runner.clone());

        let devices = govc.devices("vm-1").await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].file_name(), Some("[datastore1] vm-1/env.iso"));
        assert_eq!(devices[1].mac_address.as_deref(), Some("00:50:56:01:02:03"));

        let credentials = GuestCredentials {
            username: "vcap".to_string(),
            password: "pw".to_string(),
        };
        govc.guest_ps("vm-1", &credentials).await.unwrap();
        let call = runner.calls().pop().unwrap();
        assert_eq!(call.args, ["guest.ps", "-vm=vm-1"]);
        assert!(call
            .env
            .contains(&("GOVC_GUEST_LOGIN".to_string(), "vcap:pw".to_string())));
    }

    #[tokio::test]
    async fn test_datastore_exists() {
        let runner = FakeRunner::new(|i| {
            if i.has_arg("disks/disk-1.vmdk") {
                Ok("disk-1.vmdk\n".to_string())
            } else {
                Err(Error::command(
                    "govc",
                    None,
                    b"govc: File [datastore1] disks/disk-2.vmdk was not found",
                ))
            }
        })
        .shared();
        let govc = govc(runner);

        assert!(govc.datastore_exists("disks/disk-1.vmdk").await.unwrap());
        assert!(!govc.datastore_exists("disks/disk-2.vmdk").await.unwrap());
    }
}
