//! External tool execution.
//!
//! Image builds and the cloud client shell out to host tools (mount,
//! losetup, dd, qemu-img, euca2ools, nova-manage). All of them go through
//! [`ToolRunner`] so tests can script the host.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use spotstack_shared::errors::{SpotstackError, SpotstackResult};

/// A single external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Extra environment. Kept out of `Display`, so out of logs.
    pub env: Vec<(String, String)>,
    /// Needs root (mount, umount, losetup, dd from a loop device).
    pub privileged: bool,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            privileged: false,
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

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Program name without directories, for logs and error messages.
    pub fn display_name(&self) -> &str {
        Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program)
    }
}

impl std::fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code; `None` when killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Turn a non-zero exit into a `Tool` error naming the command.
    pub fn ensure_success(self, command: &ToolCommand) -> SpotstackResult<Self> {
        if self.success() {
            return Ok(self);
        }
        let status = match self.status {
            Some(code) => code.to_string(),
            None => "signal".to_string(),
        };
        let detail = self.stderr.trim();
        Err(SpotstackError::Tool(if detail.is_empty() {
            format!("{} exited with status {}", command.display_name(), status)
        } else {
            format!(
                "{} exited with status {}: {}",
                command.display_name(),
                status,
                detail
            )
        }))
    }
}

/// Runs external commands to completion. No timeout is applied.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, command: ToolCommand) -> SpotstackResult<ToolOutput>;
}

pub type SharedToolRunner = Arc<dyn ToolRunner>;

/// Runs commands on the host via `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct HostToolRunner {
    use_sudo: bool,
}

impl HostToolRunner {
    pub fn new(use_sudo: bool) -> Self {
        Self { use_sudo }
    }

    fn build(&self, command: &ToolCommand) -> tokio::process::Command {
        let mut cmd = if command.privileged && self.use_sudo {
            let mut cmd = tokio::process::Command::new("sudo");
            cmd.arg(&command.program);
            cmd
        } else {
            tokio::process::Command::new(&command.program)
        };
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref cwd) = command.cwd {
            cmd.current_dir(cwd);
        }
        cmd.envs(command.env.iter().map(|(k, v)| (k, v)));
        cmd
    }
}

#[async_trait]
impl ToolRunner for HostToolRunner {
    async fn run(&self, command: ToolCommand) -> SpotstackResult<ToolOutput> {
        tracing::debug!(
            command = %command,
            privileged = command.privileged,
            "Running external tool"
        );

        let output = self.build(&command).output().await.map_err(|e| {
            SpotstackError::Tool(format!("failed to spawn {}: {}", command.display_name(), e))
        })?;

        let output = ToolOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        tracing::trace!(
            command = %command.display_name(),
            status = ?output.status,
            stdout_len = output.stdout.len(),
            stderr_len = output.stderr.len(),
            "External tool finished"
        );

        Ok(output)
    }
}
