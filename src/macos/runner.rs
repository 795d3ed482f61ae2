//! Invocation of the `security` command-line utility
//!
//! Every keychain operation goes through a [`CommandRunner`]. The runner
//! reports what the process did; it never turns a non-zero exit into an
//! error. Callers look at [`CommandOutput`] and decide what is fatal.

use crate::error::{ExportError, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};

/// Default location of the macOS keychain utility
pub const SECURITY_PROGRAM: &str = "security";

/// One argument of a `security` invocation
#[derive(Clone)]
enum Arg {
    Plain(String),
    Secret(String),
}

impl Arg {
    fn value(&self) -> &str {
        match self {
            Self::Plain(v) | Self::Secret(v) => v,
        }
    }
}

/// A `security` subcommand with its arguments
///
/// Passwords are added with [`SecurityCommand::secret`] so they never show
/// up in logs or error messages.
#[derive(Clone)]
pub struct SecurityCommand {
    args: Vec<Arg>,
}

impl SecurityCommand {
    #[must_use]
    pub fn new(subcommand: &str) -> Self {
        Self {
            args: vec![Arg::Plain(subcommand.to_string())],
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(Arg::Plain(arg.as_ref().to_string()));
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(Arg::Plain(arg.as_ref().to_string()));
        }
        self
    }

    /// Append a path argument.
    pub fn path(self, path: &Path) -> Result<Self> {
        let path = path.to_str().ok_or_else(|| {
            ExportError::InvalidConfig(format!("Path is not valid UTF-8: {}", path.display()))
        })?;
        Ok(self.arg(path))
    }

    /// Append an argument that is masked when the command is displayed.
    #[must_use]
    pub fn secret(mut self, value: &str) -> Self {
        self.args.push(Arg::Secret(value.to_string()));
        self
    }

    #[must_use]
    pub fn subcommand(&self) -> &str {
        self.args.first().map(Arg::value).unwrap_or_default()
    }

    /// Raw argument values, secrets included. Only for handing to the process.
    pub fn argv(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(Arg::value)
    }
}

impl fmt::Display for SecurityCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SECURITY_PROGRAM}")?;
        for arg in &self.args {
            match arg {
                Arg::Plain(v) => write!(f, " {v}")?,
                Arg::Secret(_) => write!(f, " ****")?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SecurityCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecurityCommand({self})")
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stderr if present, otherwise stdout, trimmed.
    #[must_use]
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Executes `security` subcommands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion and capture its output.
    ///
    /// Returns `Err` only when the process could not be started.
    async fn run(&self, command: &SecurityCommand) -> Result<CommandOutput>;
}

/// Runs the real `security` binary
#[derive(Debug, Clone)]
pub struct SystemRunner {
    program: PathBuf,
}

impl SystemRunner {
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: PathBuf::from(SECURITY_PROGRAM),
        }
    }

    #[must_use]
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &SecurityCommand) -> Result<CommandOutput> {
        tracing::debug!(%command, "Running");

        let output = tokio::process::Command::new(&self.program)
            .args(command.argv())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ExportError::MissingDependency(format!(
                        "'{}' command not found",
                        self.program.display()
                    ))
                } else {
                    ExportError::CommandExecution(format!("Failed to execute {command}: {e}"))
                }
            })?;

        let output = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !output.success() {
            tracing::debug!(
                subcommand = command.subcommand(),
                code = ?output.code,
                stderr = output.stderr.trim(),
                "security returned non-zero"
            );
        }

        Ok(output)
    }
}
