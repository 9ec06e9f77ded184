//! `vmrun` for VMware Workstation and Fusion

use std::{
    fmt::{self, Display},
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Deserialize;

use super::GuestCredentials;
use crate::{
    error::{Error, Result},
    runner::{Invocation, Runner},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostType {
    #[default]
    Ws,
    Fusion,
}

impl Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostType::Ws => write!(f, "ws"),
            HostType::Fusion => write!(f, "fusion"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopMode {
    Soft,
    Hard,
}

impl Display for StopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopMode::Soft => write!(f, "soft"),
            StopMode::Hard => write!(f, "hard"),
        }
    }
}

#[derive(Clone)]
pub struct Vmrun {
    bin: PathBuf,
    host_type: HostType,
    runner: Arc<dyn Runner>,
}

impl Vmrun {
    pub fn new(bin: impl Into<PathBuf>, host_type: HostType, runner: Arc<dyn Runner>) -> Self {
        Self {
            bin: bin.into(),
            host_type,
            runner,
        }
    }

    fn command(&self, command: &str) -> Invocation {
        Invocation::new(&self.bin)
            .arg("-T")
            .arg(self.host_type.to_string())
            .arg(command)
    }

    fn guest_command(&self, command: &str, credentials: &GuestCredentials) -> Invocation {
        Invocation::new(&self.bin)
            .arg("-T")
            .arg(self.host_type.to_string())
            .arg("-gu")
            .arg(&credentials.username)
            .arg("-gp")
            .secret_arg(&credentials.password)
            .arg(command)
    }

    /// Paths of the running VMs
    pub async fn list(&self) -> Result<Vec<PathBuf>> {
        let output = self.runner.run(&self.command("list")).await?;
        Ok(parse_list(&output))
    }

    pub async fn start(&self, vmx: &Path) -> Result<()> {
        self.runner
            .run(&self.command("start").arg(path_arg(vmx)).arg("nogui"))
            .await?;
        Ok(())
    }

    pub async fn stop(&self, vmx: &Path, mode: StopMode) -> Result<()> {
        self.runner
            .run(&self.command("stop").arg(path_arg(vmx)).arg(mode.to_string()))
            .await?;
        Ok(())
    }

    pub async fn delete_vm(&self, vmx: &Path) -> Result<()> {
        self.runner
            .run(&self.command("deleteVM").arg(path_arg(vmx)))
            .await?;
        Ok(())
    }

    pub async fn clone(&self, source: &Path, target: &Path, linked: bool, name: &str) -> Result<()> {
        let kind = if linked { "linked" } else { "full" };
        self.runner
            .run(
                &self
                    .command("clone")
                    .arg(path_arg(source))
                    .arg(path_arg(target))
                    .arg(kind)
                    .arg(format!("-cloneName={}", name)),
            )
            .await?;
        Ok(())
    }

    pub async fn list_processes_in_guest(
        &self,
        vmx: &Path,
        credentials: &GuestCredentials,
    ) -> Result<String> {
        self.runner
            .run(
                &self
                    .guest_command("listProcessesInGuest", credentials)
                    .arg(path_arg(vmx)),
            )
            .await
    }

    pub async fn copy_file_to_guest(
        &self,
        vmx: &Path,
        credentials: &GuestCredentials,
        host_path: &Path,
        guest_path: &str,
    ) -> Result<()> {
        self.runner
            .run(
                &self
                    .guest_command("CopyFileFromHostToGuest", credentials)
                    .arg(path_arg(vmx))
                    .arg(path_arg(host_path))
                    .arg(guest_path),
            )
            .await?;
        Ok(())
    }

    pub async fn run_program_in_guest(
        &self,
        vmx: &Path,
        credentials: &GuestCredentials,
        program: &str,
        args: &[String],
    ) -> Result<()> {
        self.runner
            .run(
                &self
                    .guest_command("runProgramInGuest", credentials)
                    .arg(path_arg(vmx))
                    .arg(program)
                    .args(args.iter().cloned()),
            )
            .await?;
        Ok(())
    }
}

/// Guest operations fail this way until VMware Tools come up after boot
pub fn is_tools_not_running(err: &Error) -> bool {
    match err.root() {
        Error::Command { stderr, .. } => stderr.to_lowercase().contains("tools are not running"),
        _ => false,
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn parse_list(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("Total running VMs"))
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::FakeRunner;

    #[test]
    fn test_parse_list() {
        let vms = parse_list("Total running VMs: 2\n/vms/vm-a/vm-a.vmx\n/vms/vm-b/vm-b.vmx\n");
        assert_eq!(
            vms,
            vec![
                PathBuf::from("/vms/vm-a/vm-a.vmx"),
                PathBuf::from("/vms/vm-b/vm-b.vmx")
            ]
        );
        assert!(parse_list("Total running VMs: 0\n").is_empty());
    }

    #[tokio::test]
    async fn test_command_lines() {
        let runner = FakeRunner::ok().shared();
        let vmrun = Vmrun::new("/bin/vmrun", HostType::Fusion, runner.clone());
        let vmx = Path::new("/vms/vm-1/vm-1.vmx");
        let credentials = GuestCredentials {
            username: "vcap".to_string(),
            password: "c1oudc0w".to_string(),
        };

        vmrun.start(vmx).await.unwrap();
        vmrun.stop(vmx, StopMode::Soft).await.unwrap();
        vmrun
            .clone(
                Path::new("/vms/cs-1/cs-1.vmx"),
                vmx,
                true,
                "vm-1",
            )
            .await
            .unwrap();
        vmrun
            .run_program_in_guest(vmx, &credentials, "/bin/bash", &["/tmp/setup.sh".to_string()])
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(
            calls[0].args,
            ["-T", "fusion", "start", "/vms/vm-1/vm-1.vmx", "nogui"]
        );
        assert_eq!(
            calls[1].args,
            ["-T", "fusion", "stop", "/vms/vm-1/vm-1.vmx", "soft"]
        );
        assert_eq!(
            calls[2].args,
            [
                "-T",
                "fusion",
                "clone",
                "/vms/cs-1/cs-1.vmx",
                "/vms/vm-1/vm-1.vmx",
                "linked",
                "-cloneName=vm-1"
            ]
        );
        assert_eq!(
            calls[3].args,
            [
                "-T",
                "fusion",
                "-gu",
                "vcap",
                "-gp",
                "c1oudc0w",
                "runProgramInGuest",
                "/vms/vm-1/vm-1.vmx",
                "/bin/bash",
                "/tmp/setup.sh"
            ]
        );
        assert!(!calls[3].to_string().contains("c1oudc0w"));
    }

    #[test]
    fn test_tools_not_running() {
        let err = Error::command(
            "vmrun",
            None,
            b"Error: The VMware Tools are not running in the virtual machine: /vms/vm-1/vm-1.vmx",
        );
        assert!(is_tools_not_running(&err));
        assert!(!is_tools_not_running(&Error::Timeout("x".to_string())));
    }
}
