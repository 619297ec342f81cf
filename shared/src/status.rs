//! Status vocabulary published on the status topic

use std::fmt;

/// A status report, rendered as the plain-text payload the broker side expects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// Session is up and announced
    Connected,
    /// Manual restart accepted
    Restarting,
    /// Restart sequence completed
    RestartSucceeded,
    /// Restart sequence failed or could not start
    RestartFailed(String),
    /// A recognised command arrived
    CommandReceived(String),
    /// An unrecognised payload arrived
    UnknownCommand(String),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Connected => write!(f, "connected"),
            Status::Restarting => write!(f, "restarting_4g"),
            Status::RestartSucceeded => write!(f, "4g_restarted_success"),
            Status::RestartFailed(reason) => write!(f, "4g_restart_failed: {}", reason),
            Status::CommandReceived(token) => write!(f, "command_received: {}", token),
            Status::UnknownCommand(payload) => write!(f, "unknown_command: {}", payload),
        }
    }
}
