//! `ovftool`, converts stemcell OVFs into VMX virtual machines

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    error::Result,
    runner::{Invocation, Runner},
};

#[derive(Clone)]
pub struct Ovftool {
    bin: PathBuf,
    runner: Arc<dyn Runner>,
}

impl Ovftool {
    pub fn new(bin: impl Into<PathBuf>, runner: Arc<dyn Runner>) -> Self {
        Self {
            bin: bin.into(),
            runner,
        }
    }

    /// Import `ovf` as the VM `name` stored at `vmx`
    pub async fn import(&self, ovf: &Path, vmx: &Path, name: &str) -> Result<()> {
        let invocation = Invocation::new(&self.bin)
            .args([
                "--sourceType=OVF",
                "--allowAllExtraConfig",
                "--allowExtraConfig",
                "--targetType=VMX",
            ])
            .arg(format!("--name={}", name))
            .arg(ovf.to_string_lossy())
            .arg(vmx.to_string_lossy());

        self.runner.run(&invocation).await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_import_command_line() {
    use crate::runner::testing::FakeRunner;

    let runner = FakeRunner::ok().shared();
    let ovftool = Ovftool::new("/usr/bin/ovftool", runner.clone());
    ovftool
        .import(
            Path::new("/tmp/stemcell/image.ovf"),
            Path::new("/vms/cs-1/cs-1.vmx"),
            "cs-1",
        )
        .await
        .unwrap();

    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].program, PathBuf::from("/usr/bin/ovftool"));
    assert_eq!(
        calls[0].args,
        [
            "--sourceType=OVF",
            "--allowAllExtraConfig",
            "--allowExtraConfig",
            "--targetType=VMX",
            "--name=cs-1",
            "/tmp/stemcell/image.ovf",
            "/vms/cs-1/cs-1.vmx"
        ]
    );
}
