//! Error taxonomy for the agent core
//!
//! Connect-time failures are surfaced to the shell; publish-time failures
//! never leave the status reporter.

use crate::transport::TransportError;
use std::fmt;
use thiserror::Error;

/// Normalized reason for a failed broker handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Refused,
    Timeout,
    Network,
    Unknown,
}

impl FailureKind {
    /// Classify a transport error message
    pub fn classify(message: &str) -> Self {
        let message = message.to_ascii_lowercase();

        if message.contains("refused") {
            FailureKind::Refused
        } else if message.contains("timeout") || message.contains("timed out") {
            FailureKind::Timeout
        } else if ["network", "unreachable", "reset", "resolve", "dns", "no route"]
            .iter()
            .any(|needle| message.contains(needle))
        {
            FailureKind::Network
        } else {
            FailureKind::Unknown
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Refused => "connection refused",
            FailureKind::Timeout => "connection timed out",
            FailureKind::Network => "network error",
            FailureKind::Unknown => "unknown error",
        };
        f.write_str(name)
    }
}

/// A classified connect failure with the transport's own description
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} ({detail})")]
pub struct ConnectFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl ConnectFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Build a failure by classifying the detail text
    pub fn classified(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            kind: FailureKind::classify(&detail),
            detail,
        }
    }
}

/// Errors returned synchronously by the session manager
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("invalid broker address: {0}")]
    InvalidAddress(String),
    #[error("a session is already connecting or connected")]
    AlreadyActive,
    #[error("connect failed: {0}")]
    ConnectFailure(ConnectFailure),
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::InvalidAddress(reason) => SessionError::InvalidAddress(reason),
            other => SessionError::ConnectFailure(ConnectFailure::classified(other.to_string())),
        }
    }
}

/// Why a publish did not go out
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("no live broker connection")]
    NotConnected,
    #[error(transparent)]
    Transport(#[from] TransportError),
}
