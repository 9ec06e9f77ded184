use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VmxError>;

/// Errors produced while reading, editing or writing a vmx file
#[derive(Error, Debug)]
pub enum VmxError {
    #[error("vmx io failed: {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A line of the file could not be understood
    #[error("vmx parse failed at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    /// A key or value cannot be represented in the vmx format
    #[error("vmx serialize failed: {0}")]
    Serialize(String),

    #[error("vmx lock not acquired within {timeout:?}: {}", path.display())]
    LockTimeout { path: PathBuf, timeout: Duration },
}

impl VmxError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        VmxError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(line: usize, reason: impl Into<String>) -> Self {
        VmxError::Parse {
            line,
            reason: reason.into(),
        }
    }
}
