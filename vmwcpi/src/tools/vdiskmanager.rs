//! `vmware-vdiskmanager`

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    error::Result,
    runner::{Invocation, Runner},
};

#[derive(Clone)]
pub struct Vdiskmanager {
    bin: PathBuf,
    runner: Arc<dyn Runner>,
}

impl Vdiskmanager {
    pub fn new(bin: impl Into<PathBuf>, runner: Arc<dyn Runner>) -> Self {
        Self {
            bin: bin.into(),
            runner,
        }
    }

    /// Create a growable single file lsilogic disk of `size_mb`
    pub async fn create(&self, path: &Path, size_mb: u64) -> Result<()> {
        let invocation = Invocation::new(&self.bin)
            .arg("-c")
            .arg("-s")
            .arg(format!("{}MB", size_mb))
            .args(["-a", "lsilogic", "-t", "0"])
            .arg(path.to_string_lossy());

        self.runner.run(&invocation).await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_create_command_line() {
    use crate::runner::testing::FakeRunner;

    let runner = FakeRunner::ok().shared();
    Vdiskmanager::new("vmware-vdiskmanager", runner.clone())
        .create(Path::new("/vms/disks/disk-1.vmdk"), 2048)
        .await
        .unwrap();

    assert_eq!(
        runner.calls()[0].args,
        [
            "-c",
            "-s",
            "2048MB",
            "-a",
            "lsilogic",
            "-t",
            "0",
            "/vms/disks/disk-1.vmdk"
        ]
    );
}
