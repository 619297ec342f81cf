//! Privileged shell capability
//!
//! The agent never runs privileged commands itself; it hands them to an
//! out-of-process broker (a `su`-style binary) that may or may not be
//! installed and may or may not have granted us access.

use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Privileged command errors
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    Exit {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("`{command}` did not finish within {secs}s")]
    Timeout { command: String, secs: u64 },
}

/// An opaque "execute privileged command" capability
#[async_trait]
pub trait PrivilegedShell: Send + Sync {
    /// Whether the privilege broker is reachable
    async fn ping(&self) -> bool;

    /// Whether this process has been granted access
    async fn has_permission(&self) -> bool;

    /// Ask for access without waiting for the answer
    fn request_permission(&self);

    /// Run one command to completion
    async fn run(&self, command: &str) -> Result<(), ShellError>;
}

/// Configuration for the process-backed shell
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Broker program, invoked as `<program> -c <command>`
    pub program: String,
    /// Upper bound for a single command
    pub command_timeout: Duration,
    /// Upper bound for the permission probe
    pub probe_timeout: Duration,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "su".into(),
            command_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Runs commands through a `su`-compatible program
pub struct ProcessShell {
    config: ShellConfig,
}

impl ProcessShell {
    pub fn new(config: ShellConfig) -> Self {
        Self { config }
    }

    fn command(&self, command: &str) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.arg("-c").arg(command).stdin(Stdio::null());
        cmd
    }

    async fn execute(&self, command: &str, limit: Duration) -> Result<(), ShellError> {
        let mut cmd = self.command(command);
        cmd.kill_on_drop(true);

        let output = timeout(limit, cmd.output())
            .await
            .map_err(|_| ShellError::Timeout {
                command: command.to_string(),
                secs: limit.as_secs(),
            })?
            .map_err(|source| ShellError::Spawn {
                program: self.config.program.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ShellError::Exit {
                command: command.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    /// Start `command` and let it run to completion unsupervised
    fn detach(&self, command: &str) -> JoinHandle<()> {
        let mut cmd = self.command(command);
        cmd.stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        let program = self.config.program.clone();
        tokio::spawn(async move {
            match cmd.status().await {
                Ok(status) => debug!("[SHELL] Detached {} finished: {}", program, status),
                Err(e) => warn!("[SHELL] Detached {} failed: {}", program, e),
            }
        })
    }
}

#[async_trait]
impl PrivilegedShell for ProcessShell {
    async fn ping(&self) -> bool {
        which::which(&self.config.program).is_ok()
    }

    async fn has_permission(&self) -> bool {
        match self.execute("id -u", self.config.probe_timeout).await {
            Ok(()) => true,
            Err(e) => {
                debug!("[SHELL] Permission probe failed: {}", e);
                false
            }
        }
    }

    fn request_permission(&self) {
        // The grant prompt stays open until the user answers it.
        self.detach("true");
        info!("[SHELL] Requested access from {}", self.config.program);
    }

    async fn run(&self, command: &str) -> Result<(), ShellError> {
        debug!("[SHELL] Running `{}`", command);
        self.execute(command, self.config.command_timeout).await
    }
}
