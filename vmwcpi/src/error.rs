//! Error types for the CPI.
//!
//! Runners and the vmx builder return raw errors, drivers wrap them with the operation
//! that failed via [`WithContext`], and the action layer maps the result onto a BOSH
//! error type.

use std::{fmt, io, path::PathBuf, process::ExitStatus};

use thiserror::Error;
use vmxcfg::VmxError;

pub type Result<T> = std::result::Result<T, Error>;

/// Unknown and missing fields found while validating a JSON document
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationErrors {
    pub unknown: Vec<String>,
    pub missing: Vec<String>,
    pub invalid: Vec<String>,
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.unknown.is_empty() && self.missing.is_empty() && self.invalid.is_empty()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.unknown.is_empty() {
            parts.push(format!("unknown fields: {}", self.unknown.join(", ")));
        }
        if !self.missing.is_empty() {
            parts.push(format!("missing fields: {}", self.missing.join(", ")));
        }
        if !self.invalid.is_empty() {
            parts.push(format!("invalid fields: {}", self.invalid.join(", ")));
        }
        write!(f, "{}", parts.join("; "))
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Vmx(#[from] VmxError),

    #[error("io failed: {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A hypervisor CLI exited unsuccessfully or could not be spawned
    #[error("command failed: {program}: {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    /// A bounded polling loop ran out of time
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("vm not found: {0}")]
    VmNotFound(String),

    #[error("disk not found: {0}")]
    DiskNotFound(String),

    #[error("validation failed: {what}: {errors}")]
    Validation {
        what: String,
        errors: ValidationErrors,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("json failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("env iso failed: {0}")]
    Iso(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn command(program: impl Into<String>, status: Option<ExitStatus>, stderr: &[u8]) -> Self {
        Error::Command {
            program: program.into(),
            status: match status {
                Some(status) => status.to_string(),
                None => "not started".to_string(),
            },
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }

    /// The innermost error, skipping context wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

pub trait WithContext<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> WithContext<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Context {
            context: context.into(),
            source: Box::new(e.into()),
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| Error::Context {
            context: f(),
            source: Box::new(e.into()),
        })
    }
}

#[test]
fn test_root_skips_context() {
    let err: Result<()> = Err(Error::Timeout("vm-1 did not start".to_string()));
    let err = err.context("starting vm-1").context("creating vm").unwrap_err();

    assert!(matches!(err.root(), Error::Timeout(_)));
    assert_eq!(
        err.to_string(),
        "creating vm: starting vm-1: timed out: vm-1 did not start"
    );
}

#[test]
fn test_validation_message_lists_fields() {
    let errors = ValidationErrors {
        unknown: vec!["cpus".to_string()],
        missing: vec!["agent.mbus".to_string(), "vmrun.vm_store_path".to_string()],
        invalid: Vec::new(),
    };

    assert_eq!(
        errors.to_string(),
        "unknown fields: cpus; missing fields: agent.mbus, vmrun.vm_store_path"
    );
}
