//! Agent configuration from the command line and environment

use crate::action::{DataCommands, ShellConfig};
use crate::session::SessionConfig;
use clap::Parser;
use restart4g_shared::{identity, timing, Topics};
use std::time::Duration;

/// Remote 4G restart agent
///
/// Connects to an MQTT broker, listens for `restart4g` on the device's
/// command topic and toggles mobile data through a privileged shell.
#[derive(Parser, Debug, Clone)]
#[command(name = "restart4g-agent", version, about)]
pub struct AgentConfig {
    /// Broker to connect to on startup, e.g. tcp://192.168.1.10:1883
    #[arg(short, long, env = "RESTART4G_BROKER")]
    pub broker: Option<String>,

    /// Device name used in the command and status topics
    #[arg(long, default_value = identity::DEFAULT_DEVICE_NAME)]
    pub device_name: String,

    /// Device identifier sent in the registration record
    #[arg(long, default_value = identity::DEFAULT_DEVICE_ID)]
    pub device_id: String,

    /// Prefix for generated client identities
    #[arg(long, default_value = identity::DEFAULT_CLIENT_PREFIX)]
    pub client_prefix: String,

    /// Privileged shell program, invoked as `<shell> -c <command>`
    #[arg(long, default_value = "su")]
    pub shell: String,

    /// Pause between disabling and enabling mobile data, in milliseconds
    #[arg(long, default_value_t = timing::RADIO_SETTLE_MS)]
    pub settle_ms: u64,

    /// Command that turns mobile data off
    #[arg(long, default_value = "svc data disable")]
    pub disable_cmd: String,

    /// Command that turns mobile data on
    #[arg(long, default_value = "svc data enable")]
    pub enable_cmd: String,
}

impl AgentConfig {
    pub fn topics(&self) -> Topics {
        Topics::for_device(&self.device_name)
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            device_id: self.device_id.clone(),
            client_prefix: self.client_prefix.clone(),
            topics: self.topics(),
            ..Default::default()
        }
    }

    pub fn shell(&self) -> ShellConfig {
        ShellConfig {
            program: self.shell.clone(),
            ..Default::default()
        }
    }

    pub fn commands(&self) -> DataCommands {
        DataCommands {
            disable: self.disable_cmd.clone(),
            enable: self.enable_cmd.clone(),
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}
