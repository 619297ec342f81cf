//! Transport trait abstraction for pluggable broker backends

use super::address::BrokerAddress;
use crate::error::ConnectFailure;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use restart4g_shared::timing;
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport-level errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid broker address: {0}")]
    InvalidAddress(String),
    #[error("request rejected: {0}")]
    Request(String),
    #[error("transport closed")]
    Closed,
}

/// Delivery guarantee for a subscription or publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    AtLeastOnce,
}

/// Options applied when a transport is constructed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    /// Keep broker-side session state across reconnects
    pub persistent_session: bool,
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
    /// Maximum unacknowledged outbound messages
    pub max_inflight: u16,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            persistent_session: true,
            connect_timeout: Duration::from_secs(timing::CONNECT_TIMEOUT_SECS),
            keep_alive: Duration::from_secs(timing::KEEP_ALIVE_SECS),
            max_inflight: timing::MAX_INFLIGHT,
        }
    }
}

/// Events emitted by a transport, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Broker accepted a handshake (first connect or automatic reconnect)
    Established { session_present: bool },
    /// First handshake failed; the transport has stopped
    ConnectFailed(ConnectFailure),
    /// An established link dropped; the transport is retrying
    Lost { reason: String },
    /// Inbound publish
    Message { topic: String, payload: Bytes },
}

/// Receiving side of a transport's event stream
pub type TransportEvents = mpsc::Receiver<TransportEvent>;

/// Handle to a live transport
#[async_trait]
pub trait BrokerLink: Send + Sync {
    /// Subscribe to a topic
    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), TransportError>;

    /// Queue a publish without waiting for it to be written
    fn publish(&self, topic: &str, qos: Qos, payload: Bytes) -> Result<(), TransportError>;

    /// Close the transport gracefully
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Factory for creating transports
pub trait BrokerConnector: Send + Sync {
    /// Construct a transport and start connecting.
    ///
    /// Construction errors are returned here; everything that happens on the
    /// network is reported through the returned event stream.
    fn open(
        &self,
        address: &BrokerAddress,
        client_id: &str,
        options: &LinkOptions,
    ) -> Result<(Arc<dyn BrokerLink>, TransportEvents), TransportError>;
}
