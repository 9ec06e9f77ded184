//! Running hypervisor command line tools

use std::{
    fmt::{self, Display},
    path::PathBuf,
    process::Stdio,
};

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use crate::{check_command, error::Result};

/// One command line: program, arguments and extra environment
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Indices of arguments masked when displayed
    pub secrets: Vec<usize>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an argument that is passed as is but never displayed
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secrets.push(self.args.len());
        self.arg(arg)
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Whether any argument is exactly `arg`
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

/// Environment values and secret arguments are left out, they carry credentials
impl Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for (i, arg) in self.args.iter().enumerate() {
            if self.secrets.contains(&i) {
                write!(f, " ***")?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
pub trait Runner: Send + Sync {
    /// Run to completion and return stdout, or an error if the command failed
    async fn run(&self, invocation: &Invocation) -> Result<String>;
}

/// Runs commands on the local host
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalRunner;

#[async_trait]
impl Runner for LocalRunner {
    async fn run(&self, invocation: &Invocation) -> Result<String> {
        debug!("Running {}", invocation);

        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        let output = check_command(&invocation.program.to_string_lossy(), output)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
pub mod testing {
    //! A scripted runner that records every invocation

    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use async_trait::async_trait;
    use tokio::time::sleep;

    use super::{Invocation, Runner};
    use crate::error::Result;

    type Handler = Box<dyn Fn(&Invocation) -> Result<String> + Send + Sync>;

    pub struct FakeRunner {
        calls: Mutex<Vec<Invocation>>,
        handler: Handler,
        delays: Vec<(String, Duration)>,
    }

    impl FakeRunner {
        pub fn new(handler: impl Fn(&Invocation) -> Result<String> + Send + Sync + 'static) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                handler: Box::new(handler),
                delays: Vec::new(),
            }
        }

        /// Succeed with empty output for everything
        pub fn ok() -> Self {
            Self::new(|_| Ok(String::new()))
        }

        /// Sleep before answering any invocation carrying `arg`
        pub fn delay(mut self, arg: &str, duration: Duration) -> Self {
            self.delays.push((arg.to_string(), duration));
            self
        }

        pub fn shared(self) -> Arc<Self> {
            Arc::new(self)
        }

        pub fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().unwrap().clone()
        }

        /// Number of recorded invocations carrying every one of `args`
        pub fn count(&self, args: &[&str]) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|i| args.iter().all(|a| i.has_arg(a)))
                .count()
        }
    }

    #[async_trait]
    impl Runner for FakeRunner {
        async fn run(&self, invocation: &Invocation) -> Result<String> {
            self.calls.lock().unwrap().push(invocation.clone());
            for (arg, duration) in &self.delays {
                if invocation.has_arg(arg) {
                    sleep(*duration).await;
                }
            }
            (self.handler)(invocation)
        }
    }
}

#[test]
fn test_invocation_display_hides_env() {
    let invocation = Invocation::new("/usr/bin/govc")
        .arg("vm.info")
        .args(["-json", "vm-1"])
        .env("GOVC_PASSWORD", "secret");

    assert_eq!(invocation.to_string(), "/usr/bin/govc vm.info -json vm-1");
    assert!(invocation.has_arg("-json"));
    assert!(!invocation.has_arg("secret"));
}

#[test]
fn test_invocation_display_masks_secret_args() {
    let invocation = Invocation::new("vmrun")
        .args(["-gu", "vcap", "-gp"])
        .secret_arg("hunter2")
        .arg("listProcessesInGuest");

    assert_eq!(invocation.to_string(), "vmrun -gu vcap -gp *** listProcessesInGuest");
    assert_eq!(invocation.args[3], "hunter2");
}

#[tokio::test]
async fn test_local_runner_reports_failure() {
    let ok = LocalRunner
        .run(&Invocation::new("sh").args(["-c", "echo hello"]))
        .await
        .unwrap();
    assert_eq!(ok, "hello\n");

    let err = LocalRunner
        .run(&Invocation::new("sh").args(["-c", "echo broken >&2; exit 3"]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("broken"));
}
