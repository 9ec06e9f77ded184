//! Hypervisor drivers
//!
//! A [`Driver`] hides whether VMs live in a local vmrun store or on an ESXi host. The
//! power protocols (start with a bounded wait, soft stop escalating to hard stop, and
//! guest bootstrap) are shared by both drivers through [`PowerOps`].

use std::{
    io::Write,
    path::Path,
    time::Duration,
};

use async_trait::async_trait;
use derive_builder::Builder;
use log::{debug, info, warn};
use tokio::time::{interval, sleep, Instant};
use vmxcfg::VmInfo;

use crate::{
    error::{Error, Result, WithContext},
    tools::GuestCredentials,
};

pub mod esxi;
pub mod vmrun;

pub use esxi::GovcDriver;
pub use vmrun::VmrunDriver;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmState {
    NotFound,
    PoweredOff,
    PoweredOn,
}

/// Polling interval and upper bounds of the power protocols
#[derive(Builder, Clone, Debug, PartialEq, Eq)]
#[builder(default)]
pub struct Timings {
    pub tick: Duration,
    pub start_timeout: Duration,
    pub soft_stop_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            start_timeout: Duration::from_secs(600),
            soft_stop_timeout: Duration::from_secs(30),
        }
    }
}

/// Script run inside a freshly created VM before it is handed to the agent
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BootstrapParams {
    pub script_content: String,
    pub script_path: String,
    pub interpreter_path: String,
    pub ready_process_name: String,
    pub username: String,
    pub password: String,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl BootstrapParams {
    /// Bootstrap only runs when every one of these is set
    pub fn enabled(&self) -> bool {
        [
            &self.script_content,
            &self.script_path,
            &self.interpreter_path,
            &self.username,
            &self.password,
        ]
        .iter()
        .all(|v| !v.is_empty())
    }

    pub fn credentials(&self) -> GuestCredentials {
        GuestCredentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

#[async_trait]
pub trait Driver: Send + Sync {
    /// Import a stemcell OVF as the template VM `name`
    async fn import_image(&self, ovf: &Path, name: &str) -> Result<()>;
    /// Clone template `source` into `target` and apply base hardware settings
    async fn clone_vm(&self, source: &str, target: &str) -> Result<()>;
    async fn vm_state(&self, name: &str) -> Result<VmState>;

    async fn vm_exists(&self, name: &str) -> Result<bool> {
        Ok(self.vm_state(name).await? != VmState::NotFound)
    }

    async fn vm_info(&self, name: &str) -> Result<VmInfo>;
    async fn set_resources(&self, name: &str, cpus: u32, memory_mb: u32) -> Result<()>;
    async fn set_display_name(&self, name: &str, display_name: &str) -> Result<()>;
    async fn add_network_interface(&self, name: &str, network: &str, mac: &str) -> Result<()>;

    async fn start_vm(&self, name: &str) -> Result<()>;
    /// Soft stop first, hard stop once if the guest does not shut down in time
    async fn stop_vm(&self, name: &str) -> Result<()>;
    /// Succeeds when the VM is already gone
    async fn destroy_vm(&self, name: &str) -> Result<()>;
    /// No-op unless `params` is enabled
    async fn bootstrap_vm(&self, name: &str, params: &BootstrapParams) -> Result<()>;

    async fn create_disk(&self, disk: &str, size_mb: u64) -> Result<()>;
    async fn destroy_disk(&self, disk: &str) -> Result<()>;
    async fn disk_exists(&self, disk: &str) -> Result<bool>;
    async fn attach_disk(&self, name: &str, disk: &str) -> Result<()>;
    async fn detach_disk(&self, name: &str, disk: &str) -> Result<()>;
    async fn attach_ephemeral_disk(&self, name: &str, size_mb: u64) -> Result<()>;

    /// Store the agent settings ISO for `name` and insert it as its cdrom
    async fn write_env_iso(&self, name: &str, iso: &[u8]) -> Result<()>;
    async fn read_env_iso(&self, name: &str) -> Result<Vec<u8>>;
}

/// Power primitives each driver provides to the shared protocols
#[async_trait]
pub(crate) trait PowerOps: Clone + Send + Sync + 'static {
    async fn state(&self, name: &str) -> Result<VmState>;
    async fn power_on(&self, name: &str) -> Result<()>;
    async fn soft_stop(&self, name: &str) -> Result<()>;
    async fn hard_stop(&self, name: &str) -> Result<()>;
    async fn stopped_cleanly(&self, name: &str) -> Result<bool>;

    async fn guest_processes(&self, name: &str, credentials: &GuestCredentials) -> Result<String>;
    async fn copy_to_guest(
        &self,
        name: &str,
        credentials: &GuestCredentials,
        host_path: &Path,
        guest_path: &str,
    ) -> Result<()>;
    async fn run_in_guest(
        &self,
        name: &str,
        credentials: &GuestCredentials,
        program: &str,
        args: &[String],
    ) -> Result<()>;
    fn tools_not_running(&self, err: &Error) -> bool;
}

/// Power on and wait for the running state, plus one tick for the guest to settle
pub(crate) async fn start<P: PowerOps>(ops: &P, timings: &Timings, name: &str) -> Result<()> {
    info!("Starting {}", name);
    ops.power_on(name).await?;

    let deadline = Instant::now() + timings.start_timeout;
    loop {
        if ops.state(name).await? == VmState::PoweredOn {
            sleep(timings.tick).await;
            info!("{} is running", name);
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(Error::Timeout(format!(
                "{} did not power on within {:?}",
                name, timings.start_timeout
            )));
        }
        sleep(timings.tick).await;
    }
}

/// Request a soft stop in the background while polling for a clean shutdown, and
/// force the VM off once if the deadline passes
pub(crate) async fn stop<P: PowerOps>(ops: &P, timings: &Timings, name: &str) -> Result<()> {
    if ops.state(name).await? != VmState::PoweredOn {
        debug!("{} is not running", name);
        return Ok(());
    }

    info!("Stopping {}", name);
    let background = ops.clone();
    let owned = name.to_string();
    let mut soft = tokio::spawn(async move { background.soft_stop(&owned).await });
    let mut soft_done = false;

    let deadline = Instant::now() + timings.soft_stop_timeout;
    let mut ticker = interval(timings.tick);
    loop {
        tokio::select! {
            joined = &mut soft, if !soft_done => {
                soft_done = true;
                match joined {
                    Ok(Ok(())) => debug!("Soft stop of {} returned", name),
                    Ok(Err(e)) => warn!("Soft stop of {} failed: {}", name, e),
                    Err(e) => warn!("Soft stop of {} did not complete: {}", name, e),
                }
            }
            _ = ticker.tick() => {
                match ops.stopped_cleanly(name).await {
                    Ok(true) => {
                        info!("{} shut down cleanly", name);
                        return Ok(());
                    }
                    Ok(false) => {}
                    Err(e) => debug!("Could not check shutdown of {}: {}", name, e),
                }
                if Instant::now() >= deadline {
                    break;
                }
            }
        }
    }

    warn!(
        "{} did not shut down within {:?}, forcing power off",
        name, timings.soft_stop_timeout
    );
    ops.hard_stop(name)
        .await
        .with_context(|| format!("forcing {} off", name))
}

/// Boot the VM, wait for its guest to be usable, run the bootstrap script and stop it
pub(crate) async fn bootstrap<P: PowerOps>(
    ops: &P,
    timings: &Timings,
    name: &str,
    params: &BootstrapParams,
) -> Result<()> {
    if !params.enabled() {
        debug!("No bootstrap configured for {}", name);
        return Ok(());
    }

    start(ops, timings, name)
        .await
        .with_context(|| format!("starting {} for bootstrap", name))?;
    sleep(params.min_wait).await;

    let credentials = params.credentials();
    let deadline = Instant::now() + params.max_wait;
    loop {
        match ops.guest_processes(name, &credentials).await {
            Ok(processes)
                if params.ready_process_name.is_empty()
                    || processes.contains(&params.ready_process_name) =>
            {
                break;
            }
            Ok(_) => debug!("Waiting for {} in {}", params.ready_process_name, name),
            Err(e) if ops.tools_not_running(&e) => debug!("Guest tools not up in {}", name),
            Err(e) => {
                return Err(e).with_context(|| format!("listing processes in {}", name));
            }
        }
        if Instant::now() >= deadline {
            return Err(Error::Timeout(format!(
                "{} was not ready for bootstrap within {:?}",
                name, params.max_wait
            )));
        }
        sleep(timings.tick).await;
    }

    let mut script = tempfile::NamedTempFile::new().map_err(|e| Error::io("bootstrap script", e))?;
    script
        .write_all(params.script_content.as_bytes())
        .map_err(|e| Error::io(script.path(), e))?;

    info!("Running bootstrap script in {}", name);
    ops.copy_to_guest(name, &credentials, script.path(), &params.script_path)
        .await
        .context("copying bootstrap script")?;
    ops.run_in_guest(
        name,
        &credentials,
        &params.interpreter_path,
        &[params.script_path.clone()],
    )
    .await
    .context("running bootstrap script")?;

    stop(ops, timings, name).await
}

#[cfg(test)]
pub(crate) fn test_timings() -> Timings {
    TimingsBuilder::default()
        .tick(Duration::from_millis(10))
        .start_timeout(Duration::from_millis(100))
        .soft_stop_timeout(Duration::from_millis(60))
        .build()
        .unwrap()
}

#[test]
fn test_bootstrap_enabled_needs_all_five() {
    let mut params = BootstrapParams {
        script_content: "echo hi".to_string(),
        script_path: "/tmp/bootstrap.sh".to_string(),
        interpreter_path: "/bin/bash".to_string(),
        username: "vcap".to_string(),
        password: "c1oudc0w".to_string(),
        ..Default::default()
    };
    assert!(params.enabled());

    params.password.clear();
    assert!(!params.enabled());
}
