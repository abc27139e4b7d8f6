//! Child process execution
//!
//! Every short-lived subprocess the harness runs goes through the
//! [`CommandRunner`] trait: the system validation re-exec, `systemctl`,
//! image pulls and the spec commands. A run produces an [`ExecOutput`]
//! holding the exit status and the combined stdout/stderr, in the order the
//! child wrote them.
//!
//! Long-running services are not started through this trait; see
//! [`crate::services`].

pub mod mock;

use anyhow::{Context, Result};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// A command to run: program, arguments and extra environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
    /// Capture combined output (true) or let the child write to our stdout/stderr
    pub capture: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            capture: true,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn inherit_output(mut self) -> Self {
        self.capture = false;
        self
    }

    /// Build the `std::process::Command` equivalent (stdio left untouched)
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Result of a finished child process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code, `None` when the child was killed by a signal
    pub code: Option<i32>,
    /// Combined stdout and stderr (empty when output was not captured)
    pub output: Vec<u8>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    /// Human readable exit status
    pub fn status_string(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {}", code),
            None => "termination by signal".to_string(),
        }
    }
}

/// Runs a command to completion
pub trait CommandRunner: Send + Sync {
    /// Run the command and wait for it.
    ///
    /// Returns `Err` only when the command could not be launched; a non-zero
    /// exit is reported through [`ExecOutput::code`].
    fn run(&self, spec: &CommandSpec) -> Result<ExecOutput>;
}

/// Runs commands as real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<ExecOutput> {
        let mut cmd = spec.to_command();
        cmd.stdin(Stdio::null());

        if !spec.capture {
            let status = cmd
                .status()
                .with_context(|| format!("Failed to launch {}", spec))?;
            return Ok(ExecOutput {
                code: status.code(),
                output: Vec::new(),
            });
        }

        // stdout and stderr share one file so the output keeps its interleaving
        let mut capture = tempfile::tempfile().context("Failed to create output capture file")?;
        cmd.stdout(Stdio::from(capture.try_clone()?));
        cmd.stderr(Stdio::from(capture.try_clone()?));

        let status = cmd
            .status()
            .with_context(|| format!("Failed to launch {}", spec))?;

        let mut output = Vec::new();
        capture.seek(SeekFrom::Start(0))?;
        capture
            .read_to_end(&mut output)
            .context("Failed to read captured output")?;

        Ok(ExecOutput {
            code: status.code(),
            output,
        })
    }
}

/// Build a command that re-executes `exe` with `flags` ahead of `args`.
///
/// `args` is the original argument list without the program name. The flags
/// go first so a trailing `-- <spec args>` section stays last.
pub fn reexec_command(exe: &Path, flags: &[&str], args: &[OsString]) -> CommandSpec {
    CommandSpec::new(exe).args(flags.iter()).args(args.iter())
}

/// Arguments this process was started with, without the program name
pub fn current_args() -> Vec<OsString> {
    std::env::args_os().skip(1).collect()
}

/// Path of the running executable
pub fn current_exe() -> Result<PathBuf> {
    std::env::current_exe().context("Failed to get current executable path")
}
