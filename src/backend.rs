use std::io;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::{DriverError, Result};

/// Runs external programs on behalf of the driver.
pub trait Backend {
    /// Run `program` with `args` to completion and return its stdout.
    fn execute(&self, program: &str, args: &[String]) -> Result<String>;
}

impl<B: Backend + ?Sized> Backend for &B {
    fn execute(&self, program: &str, args: &[String]) -> Result<String> {
        (**self).execute(program, args)
    }
}

/// Backend that spawns real subprocesses.
#[derive(Clone, Copy, Debug, Default)]
pub struct Subprocess;

impl Backend for Subprocess {
    fn execute(&self, program: &str, args: &[String]) -> Result<String> {
        let command = render(program, args);
        debug!(%command, "Executing");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => DriverError::NotFound {
                    program: program.to_string(),
                },
                _ => DriverError::Spawn {
                    program: program.to_string(),
                    source,
                },
            })?;

        if !output.status.success() {
            return Err(DriverError::Failed {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8(output.stdout).map_err(|_| DriverError::InvalidUtf8 { command })
    }
}

/// Space-joined argv, used in logs and error messages.
pub fn render(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}
