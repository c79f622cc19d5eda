//! Subprocess plumbing shared by the shell-command backends (ADB and HDC).

use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

use super::{ArtifactStore, DeviceError};

/// Errors raised while running a backend tool.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShellError {
    #[error("{0} is not installed or not in PATH")]
    ToolMissing(String),
    #[error("Command timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("Failed to run {program}: {reason}")]
    Spawn { program: String, reason: String },
}

impl ShellError {
    /// Short classification used in cleanup reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ShellError::ToolMissing(_) => "ToolMissing",
            ShellError::Timeout(_) => "Timeout",
            ShellError::Spawn { .. } => "Spawn",
        }
    }
}

/// Captured output of a finished command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShellOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl ShellOutput {
    /// Successful output carrying `stdout`.
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// stdout followed by stderr, the way the tools interleave diagnostics.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout_text(), self.stderr)
    }
}

/// Runs one backend tool with a per-call timeout.
///
/// The trait exists so drivers, connection managers and the cleanup manager
/// can be exercised against scripted output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Name of the executable (e.g. `adb`).
    fn program(&self) -> &str;

    /// Run the tool with `args`, killing it if `timeout` elapses.
    async fn run(&self, args: &[String], timeout: Duration) -> Result<ShellOutput, ShellError>;
}

/// [`CommandRunner`] backed by a real executable on `PATH`.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    program: String,
}

impl ToolRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Convenience for the shared-pointer form the drivers hold.
    pub fn shared(program: impl Into<String>) -> Arc<dyn CommandRunner> {
        Arc::new(Self::new(program))
    }
}

#[async_trait]
impl CommandRunner for ToolRunner {
    fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, args: &[String], timeout: Duration) -> Result<ShellOutput, ShellError> {
        tracing::debug!("[{}] {}", self.program, args.join(" "));

        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ShellError::ToolMissing(self.program.clone()),
                _ => ShellError::Spawn {
                    program: self.program.clone(),
                    reason: e.to_string(),
                },
            })?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ShellError::Timeout(timeout))?
            .map_err(|e| ShellError::Spawn {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        let result = ShellOutput {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success() {
            tracing::debug!(
                "[{}] exited with {:?}: {}",
                self.program,
                result.status,
                result.stderr.trim()
            );
        }

        Ok(result)
    }
}

/// Build `prefix + rest` as owned arguments.
pub(crate) fn with_prefix(prefix: &[String], rest: &[&str]) -> Vec<String> {
    prefix
        .iter()
        .cloned()
        .chain(rest.iter().map(|s| s.to_string()))
        .collect()
}

/// A device addressed through one tool: the runner plus the `-s`/`-t` prefix.
#[derive(Clone)]
pub struct ShellTarget {
    runner: Arc<dyn CommandRunner>,
    prefix: Vec<String>,
    timeout: Duration,
}

impl ShellTarget {
    pub fn new(runner: Arc<dyn CommandRunner>, prefix: Vec<String>, timeout: Duration) -> Self {
        Self {
            runner,
            prefix,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `<tool> <prefix> <rest>` with an explicit timeout.
    pub async fn run_with(&self, rest: &[&str], timeout: Duration) -> Result<ShellOutput, ShellError> {
        self.runner.run(&with_prefix(&self.prefix, rest), timeout).await
    }

    /// `<tool> <prefix> <rest>`.
    pub async fn run(&self, rest: &[&str]) -> Result<ShellOutput, ShellError> {
        self.run_with(rest, self.timeout).await
    }

    /// `<tool> <prefix> shell <rest>` with an explicit timeout.
    pub async fn shell_with(&self, rest: &[&str], timeout: Duration) -> Result<ShellOutput, ShellError> {
        let mut args = with_prefix(&self.prefix, &["shell"]);
        args.extend(rest.iter().map(|s| s.to_string()));
        self.runner.run(&args, timeout).await
    }

    /// `<tool> <prefix> shell <rest>`.
    pub async fn shell(&self, rest: &[&str]) -> Result<ShellOutput, ShellError> {
        self.shell_with(rest, self.timeout).await
    }

    /// Run a gesture command; a non-zero exit is a [`DeviceError`].
    pub async fn exec(&self, rest: &[&str]) -> Result<ShellOutput, DeviceError> {
        let output = self.shell(rest).await?;
        if !output.success() {
            return Err(DeviceError::CommandFailed {
                command: format!("{} shell {}", self.runner.program(), rest.join(" ")),
                message: output.combined().trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// On-device scratch file reachable through `<tool> shell`.
///
/// Both shell backends expose a POSIX-ish shell, so existence checks,
/// removal and metadata share one implementation.
pub struct ShellArtifacts {
    target: ShellTarget,
}

impl ShellArtifacts {
    pub fn new(target: ShellTarget) -> Self {
        Self { target }
    }
}

#[async_trait]
impl ArtifactStore for ShellArtifacts {
    async fn exists(&self, path: &str, timeout: Duration) -> Result<bool, ShellError> {
        let output = self.target.shell_with(&["test", "-f", path], timeout).await?;
        Ok(output.success())
    }

    async fn remove(&self, path: &str, timeout: Duration) -> Result<(), ShellError> {
        self.target.shell_with(&["rm", "-f", path], timeout).await?;
        Ok(())
    }

    async fn modified_at(&self, path: &str, timeout: Duration) -> Result<Option<String>, ShellError> {
        let output = self.target.shell_with(&["stat", "-c", "%Y", path], timeout).await?;
        if !output.success() {
            return Ok(None);
        }
        Ok(Some(output.stdout_text().trim().to_string()))
    }

    async fn describe(&self, path: &str, timeout: Duration) -> Result<Option<String>, ShellError> {
        let output = self.target.shell_with(&["ls", "-la", path], timeout).await?;
        if !output.success() || output.combined().contains("No such file") {
            return Ok(None);
        }
        Ok(Some(output.stdout_text().trim().to_string()))
    }
}
