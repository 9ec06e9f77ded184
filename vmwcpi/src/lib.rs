use std::{
    io::{self, BufRead},
    process::Output,
};

use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;

pub mod action;
pub mod agent;
pub mod cloudprops;
pub mod config;
pub mod driver;
pub mod error;
pub mod ids;
pub mod runner;
pub mod schema;
pub mod stemcell;
pub mod tools;
pub mod util;

use crate::error::{Error, Result};

/// Turn the result of running `program` into an error unless it exited successfully,
/// logging whatever it printed
pub fn check_command(program: &str, result: io::Result<Output>) -> Result<Output> {
    match result {
        Ok(output) => {
            if output.status.success() {
                Ok(output)
            } else {
                error!("Command {} failed. Output:", program);

                output
                    .stdout
                    .lines()
                    .filter_map(|l| l.ok())
                    .for_each(|l| {
                        error!("out: {}", l);
                    });

                output
                    .stderr
                    .lines()
                    .filter_map(|l| l.ok())
                    .for_each(|l| {
                        error!("err: {}", l);
                    });

                // vmrun reports its errors on stdout
                let message = if output.stderr.iter().all(u8::is_ascii_whitespace) {
                    &output.stdout
                } else {
                    &output.stderr
                };
                Err(Error::command(program, Some(output.status), message))
            }
        }
        Err(e) => Err(Error::command(program, None, e.to_string().as_bytes())),
    }
}

/// Log to stderr, stdout carries the CPI response. `RUST_LOG` overrides the level.
pub fn logging_config() -> std::result::Result<(), log::SetLoggerError> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()?;
    info!("Logging configured");
    Ok(())
}

#[cfg(test)]
fn exit_output(code: i32, stdout: &str, stderr: &str) -> Output {
    use std::os::unix::process::ExitStatusExt;

    Output {
        status: std::process::ExitStatus::from_raw(code << 8),
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

#[test]
fn test_check_command_success() {
    let output = check_command("vmrun", Ok(exit_output(0, "ok\n", ""))).unwrap();
    assert_eq!(output.stdout, b"ok\n");
}

#[test]
fn test_check_command_uses_stdout_when_stderr_empty() {
    let err = check_command(
        "vmrun",
        Ok(exit_output(
            255,
            "Error: The VMware Tools are not running in the virtual machine\n",
            "",
        )),
    )
    .unwrap_err();

    match err {
        Error::Command {
            program, stderr, ..
        } => {
            assert_eq!(program, "vmrun");
            assert_eq!(
                stderr,
                "Error: The VMware Tools are not running in the virtual machine"
            );
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_check_command_spawn_failure() {
    let err = check_command(
        "govc",
        Err(io::Error::new(io::ErrorKind::NotFound, "no such file")),
    )
    .unwrap_err();

    assert!(matches!(err, Error::Command { ref status, .. } if status == "not started"));
}

#[test]
fn test_logging_config() {
    assert!(logging_config().is_ok());
}
