//! restart4g Shared Protocol Types
//!
//! This crate provides the topic layout, payload codec, status vocabulary and
//! connection state machine shared between the device agent and any
//! broker-side tooling.

pub mod codec;
pub mod state_machine;
pub mod status;

use std::time::{SystemTime, UNIX_EPOCH};

pub use codec::{Command, RegistrationRecord};
pub use state_machine::{ConnectionState, ConnectionStateMachine, LinkEvent, TransitionResult};
pub use status::Status;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Identity defaults for a device
pub mod identity {
    /// Device name used to build the per-device topics
    pub const DEFAULT_DEVICE_NAME: &str = "oppo";

    /// Fixed device identifier carried in the registration record
    pub const DEFAULT_DEVICE_ID: &str = "oppo-device";

    /// Prefix of the per-session client identity (`<prefix>-<unix millis>`)
    pub const DEFAULT_CLIENT_PREFIX: &str = "oppo";
}

/// Session and action timing parameters
pub mod timing {
    /// Transport connect timeout in seconds
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;

    /// Keep-alive interval in seconds
    pub const KEEP_ALIVE_SECS: u64 = 30;

    /// Maximum unacknowledged outbound messages
    pub const MAX_INFLIGHT: u16 = 5;

    /// Pause between handshake and the registration publish
    pub const REGISTRATION_DELAY_MS: u64 = 500;

    /// Pause between the registration publish and the `connected` status
    pub const CONNECTED_STATUS_DELAY_MS: u64 = 2000;

    /// Time the radio needs to fully drop before it is re-enabled
    pub const RADIO_SETTLE_MS: u64 = 2000;
}

/// Topic names used by one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// Inbound commands (subscribed at least-once)
    pub command: String,
    /// Free-form status reports
    pub status: String,
    /// Registration records, shared by every device
    pub register: String,
}

impl Topics {
    /// Registration topic shared by all devices
    pub const REGISTER: &'static str = "device/register";

    /// Build the topic set for a named device
    pub fn for_device(name: &str) -> Self {
        Self {
            command: format!("device/{name}/restart4g"),
            status: format!("device/{name}/status"),
            register: Self::REGISTER.into(),
        }
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::for_device(identity::DEFAULT_DEVICE_NAME)
    }
}
