//! Broker transport layer
//!
//! The session manager only talks to the [`BrokerConnector`] and
//! [`BrokerLink`] traits; the MQTT implementation lives in [`mqtt`].

pub mod address;
#[cfg(test)]
pub mod mock;
pub mod mqtt;
pub mod traits;

pub use address::BrokerAddress;
pub use mqtt::{Backoff, MqttConnector};
pub use traits::{
    BrokerConnector, BrokerLink, LinkOptions, Qos, TransportError, TransportEvent, TransportEvents,
};
