//! Broker address parsing

use crate::error::SessionError;
use std::fmt;
use url::{Host, Url};

/// Default MQTT port
pub const DEFAULT_PORT: u16 = 1883;

/// A validated plain-TCP broker endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    host: String,
    port: u16,
}

impl BrokerAddress {
    /// Parse `tcp://host[:port]` or `mqtt://host[:port]`
    pub fn parse(input: &str) -> Result<Self, SessionError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SessionError::InvalidAddress("address is empty".into()));
        }

        let url = Url::parse(trimmed)
            .map_err(|e| SessionError::InvalidAddress(format!("{}: {}", trimmed, e)))?;

        match url.scheme() {
            "tcp" | "mqtt" => {}
            other => {
                return Err(SessionError::InvalidAddress(format!(
                    "unsupported scheme '{}'",
                    other
                )))
            }
        }

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => {
                return Err(SessionError::InvalidAddress(format!(
                    "{}: missing host",
                    trimmed
                )))
            }
        };

        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "tcp://[{}]:{}", self.host, self.port)
        } else {
            write!(f, "tcp://{}:{}", self.host, self.port)
        }
    }
}
