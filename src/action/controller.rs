//! Mobile data controller
//!
//! Restarts the cellular link by disabling mobile data, waiting for the radio
//! to drop, then enabling it again.

use super::shell::{PrivilegedShell, ShellError};
use async_trait::async_trait;
use restart4g_shared::{timing, Status};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Logical state of the mobile data link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Enabled,
    Disabled,
}

/// Why the action could not start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    CapabilityNotRunning,
    PermissionDenied,
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unavailable::CapabilityNotRunning => write!(f, "capability not running"),
            Unavailable::PermissionDenied => write!(f, "permission not granted"),
        }
    }
}

/// Result of a restart
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Success,
    Failure(String),
    Unavailable(Unavailable),
}

impl ActionOutcome {
    /// Status report announcing this outcome
    pub fn status(&self) -> Status {
        match self {
            ActionOutcome::Success => Status::RestartSucceeded,
            ActionOutcome::Failure(reason) => Status::RestartFailed(reason.clone()),
            ActionOutcome::Unavailable(reason) => Status::RestartFailed(reason.to_string()),
        }
    }
}

/// The side-effecting action behind the `restart4g` command
#[async_trait]
pub trait NetworkAction: Send + Sync {
    async fn restart(&self) -> ActionOutcome;
}

/// Shell commands toggling mobile data
#[derive(Debug, Clone)]
pub struct DataCommands {
    pub disable: String,
    pub enable: String,
}

impl Default for DataCommands {
    fn default() -> Self {
        Self {
            disable: "svc data disable".into(),
            enable: "svc data enable".into(),
        }
    }
}

/// Toggles mobile data through a privileged shell
pub struct MobileDataController {
    shell: Arc<dyn PrivilegedShell>,
    commands: DataCommands,
    settle: Duration,
    state: RwLock<NetworkState>,
}

impl MobileDataController {
    pub fn new(shell: Arc<dyn PrivilegedShell>) -> Self {
        Self {
            shell,
            commands: DataCommands::default(),
            settle: Duration::from_millis(timing::RADIO_SETTLE_MS),
            state: RwLock::new(NetworkState::Enabled),
        }
    }

    pub fn with_commands(mut self, commands: DataCommands) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Last known state of the link
    pub async fn network_state(&self) -> NetworkState {
        *self.state.read().await
    }

    async fn toggle(&self, target: NetworkState) -> Result<(), ShellError> {
        let command = match target {
            NetworkState::Enabled => &self.commands.enable,
            NetworkState::Disabled => &self.commands.disable,
        };
        self.shell.run(command).await?;
        *self.state.write().await = target;
        Ok(())
    }
}

#[async_trait]
impl NetworkAction for MobileDataController {
    async fn restart(&self) -> ActionOutcome {
        if !self.shell.ping().await {
            warn!("[ACTION] Privileged shell is not running");
            return ActionOutcome::Unavailable(Unavailable::CapabilityNotRunning);
        }

        if !self.shell.has_permission().await {
            warn!("[ACTION] Privileged shell permission not granted, requesting");
            self.shell.request_permission();
            return ActionOutcome::Unavailable(Unavailable::PermissionDenied);
        }

        info!("[ACTION] Disabling mobile data");
        let disabled = self.toggle(NetworkState::Disabled).await;
        if let Err(e) = &disabled {
            warn!("[ACTION] Disable failed: {}", e);
        }

        tokio::time::sleep(self.settle).await;

        // Enable regardless of the disable result so the link is never left down.
        info!("[ACTION] Enabling mobile data");
        let enabled = self.toggle(NetworkState::Enabled).await;
        if let Err(e) = &enabled {
            warn!("[ACTION] Enable failed: {}", e);
        }

        match (disabled, enabled) {
            (Ok(()), Ok(())) => ActionOutcome::Success,
            (Err(d), Ok(())) => ActionOutcome::Failure(format!("disable failed: {}", d)),
            (Ok(()), Err(e)) => ActionOutcome::Failure(format!("enable failed: {}", e)),
            (Err(d), Err(e)) => ActionOutcome::Failure(format!(
                "disable failed: {}; enable failed: {}",
                d, e
            )),
        }
    }
}
