//! Advisory lock serializing edits of one vmx file between cooperating processes

use std::{
    fs::{File, OpenOptions},
    os::unix::io::AsRawFd,
    path::{Path, PathBuf},
    thread::sleep,
    time::{Duration, Instant},
};

use log::{debug, warn};
use nix::{
    errno::Errno,
    fcntl::{flock, FlockArg},
};

use crate::error::{Result, VmxError};

const LOCK_POLL: Duration = Duration::from_millis(100);

/// Exclusive `flock` held on `<vmx>.cpilock` until dropped
pub struct VmxLock {
    file: File,
    path: PathBuf,
}

impl VmxLock {
    /// Retry a non-blocking exclusive lock every poll interval until `timeout` runs out
    pub fn acquire(vmx_path: &Path, timeout: Duration) -> Result<Self> {
        let path = lock_path(vmx_path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|e| VmxError::io(&path, e))?;

        let started = Instant::now();
        loop {
            match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
                Ok(()) => {
                    debug!("Locked {}", path.to_string_lossy());
                    return Ok(Self { file, path });
                }
                Err(Errno::EWOULDBLOCK) if started.elapsed() < timeout => sleep(LOCK_POLL),
                Err(Errno::EWOULDBLOCK) => {
                    return Err(VmxError::LockTimeout { path, timeout });
                }
                Err(e) => return Err(VmxError::io(&path, e.into())),
            }
        }
    }
}

impl Drop for VmxLock {
    fn drop(&mut self) {
        if let Err(e) = flock(self.file.as_raw_fd(), FlockArg::Unlock) {
            warn!("Failed to unlock {}: {}", self.path.to_string_lossy(), e);
        }
    }
}

fn lock_path(vmx_path: &Path) -> PathBuf {
    let mut name = vmx_path.as_os_str().to_owned();
    name.push(".cpilock");
    PathBuf::from(name)
}

#[test]
fn test_second_lock_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let vmx = dir.path().join("vm-1.vmx");

    let held = VmxLock::acquire(&vmx, Duration::from_millis(10)).unwrap();
    let second = VmxLock::acquire(&vmx, Duration::from_millis(250));
    assert!(matches!(second, Err(VmxError::LockTimeout { .. })));

    drop(held);
    assert!(VmxLock::acquire(&vmx, Duration::from_millis(10)).is_ok());
}
