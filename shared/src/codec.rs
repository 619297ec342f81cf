//! Payload codec for the command and registration topics
//!
//! Commands are plain-text tokens. Registration records are small JSON
//! objects, kept compact because they are published right after a handshake.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The only command token the device recognises
pub const RESTART_4G: &str = "restart4g";

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// A decoded inbound command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Toggle mobile data off and back on
    Restart4g,
    /// Anything else, carrying the payload as received
    Unknown(String),
}

impl Command {
    /// Token reported back in `command_received`
    pub fn token(&self) -> &str {
        match self {
            Command::Restart4g => RESTART_4G,
            Command::Unknown(payload) => payload,
        }
    }
}

/// Decode a command payload.
///
/// Surrounding whitespace is ignored when matching, but an unknown command
/// keeps its original text so it can be echoed back verbatim.
pub fn decode_command(payload: &[u8]) -> Command {
    let text = String::from_utf8_lossy(payload);
    match text.trim() {
        RESTART_4G => Command::Restart4g,
        _ => Command::Unknown(text.into_owned()),
    }
}

/// Registration announcement sent once per successful connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    pub action: String,
    pub device_id: String,
    pub client_id: String,
}

impl RegistrationRecord {
    pub fn new(device_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            action: "register".into(),
            device_id: device_id.into(),
            client_id: client_id.into(),
        }
    }
}

/// Encode a registration record as compact JSON
pub fn encode_registration(record: &RegistrationRecord) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(record)?)
}
