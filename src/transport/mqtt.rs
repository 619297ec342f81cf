//! MQTT transport implementation over rumqttc (protocol 3.1.1)

use super::address::BrokerAddress;
use super::traits::{
    BrokerConnector, BrokerLink, LinkOptions, Qos, TransportError, TransportEvent, TransportEvents,
};
use crate::error::{ConnectFailure, FailureKind};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, NetworkOptions, Outgoing, Packet,
    QoS,
};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Capacity of the client request queue
const REQUEST_CAPACITY: usize = 10;

/// Capacity of the transport event channel
const EVENT_CAPACITY: usize = 100;

/// Reconnect backoff applied after the first successful handshake
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    /// Reconnection delay (initial)
    pub initial: Duration,
    /// Maximum reconnection delay
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

/// Connector producing rumqttc-backed links
#[derive(Debug, Clone, Default)]
pub struct MqttConnector {
    backoff: Backoff,
}

impl MqttConnector {
    pub fn new(backoff: Backoff) -> Self {
        Self { backoff }
    }
}

impl BrokerConnector for MqttConnector {
    fn open(
        &self,
        address: &BrokerAddress,
        client_id: &str,
        options: &LinkOptions,
    ) -> Result<(Arc<dyn BrokerLink>, TransportEvents), TransportError> {
        if address.port() == 0 {
            return Err(TransportError::InvalidAddress(format!(
                "{}: port 0 is not connectable",
                address
            )));
        }
        if client_id.is_empty() || client_id.starts_with(char::is_whitespace) {
            return Err(TransportError::Request(format!(
                "invalid client id '{}'",
                client_id
            )));
        }
        if options.keep_alive < Duration::from_secs(1) {
            return Err(TransportError::Request(
                "keep-alive must be at least one second".into(),
            ));
        }

        let mut mqtt_options = MqttOptions::new(client_id, address.host(), address.port());
        mqtt_options
            .set_keep_alive(options.keep_alive)
            .set_clean_session(!options.persistent_session)
            .set_inflight(options.max_inflight);

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        let mut network_options = NetworkOptions::new();
        network_options.set_connection_timeout(options.connect_timeout.as_secs());
        eventloop.set_network_options(network_options);

        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let backoff = self.backoff;
        tokio::spawn(async move {
            drive_event_loop(eventloop, event_tx, shutdown_rx, backoff).await;
        });

        info!("[MQTT] Opening {} as {}", address, client_id);

        let link = MqttLink {
            client,
            shutdown: shutdown_tx,
        };
        Ok((Arc::new(link), event_rx))
    }
}

/// Live rumqttc client handle
pub struct MqttLink {
    client: AsyncClient,
    shutdown: watch::Sender<bool>,
}

impl MqttLink {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if *self.shutdown.borrow() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

fn to_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtLeastOnce => QoS::AtLeastOnce,
    }
}

#[async_trait]
impl BrokerLink for MqttLink {
    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.client
            .subscribe(topic, to_qos(qos))
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    fn publish(&self, topic: &str, qos: Qos, payload: Bytes) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.client
            .try_publish(topic, to_qos(qos), false, payload.to_vec())
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        // Queue a clean DISCONNECT, then stop the event loop whether or not
        // the broker is currently reachable.
        let result = self
            .client
            .try_disconnect()
            .map_err(|e| TransportError::Request(e.to_string()));
        self.shutdown.send_replace(true);
        result
    }
}

/// Translate a rumqttc connection error into a classified failure
fn classify(err: &ConnectionError) -> ConnectFailure {
    let kind = match err {
        ConnectionError::ConnectionRefused(_) => FailureKind::Refused,
        ConnectionError::NetworkTimeout => FailureKind::Timeout,
        ConnectionError::Io(io_err) => match io_err.kind() {
            io::ErrorKind::ConnectionRefused => FailureKind::Refused,
            io::ErrorKind::TimedOut => FailureKind::Timeout,
            _ => FailureKind::Network,
        },
        other => FailureKind::classify(&other.to_string()),
    };
    ConnectFailure::new(kind, err.to_string())
}

/// Poll the rumqttc event loop, forwarding typed events until shut down.
///
/// Polling again after an error makes rumqttc reconnect, so retry is driven
/// here with exponential backoff once a first handshake has succeeded.
async fn drive_event_loop(
    mut eventloop: EventLoop,
    events: mpsc::Sender<TransportEvent>,
    mut shutdown: watch::Receiver<bool>,
    backoff: Backoff,
) {
    let mut ever_connected = false;
    let mut connected = false;
    let mut reconnect_delay = backoff.initial;

    loop {
        let polled = tokio::select! {
            biased;
            polled = eventloop.poll() => polled,
            _ = shutdown.changed() => break,
        };

        let event = match polled {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                ever_connected = true;
                connected = true;
                reconnect_delay = backoff.initial;
                TransportEvent::Established {
                    session_present: ack.session_present,
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => TransportEvent::Message {
                topic: publish.topic,
                payload: publish.payload,
            },
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("[MQTT] Disconnect sent");
                break;
            }
            Ok(_) => continue,
            Err(err) => {
                if !ever_connected {
                    let failure = classify(&err);
                    warn!("[MQTT] Connect failed: {}", failure);
                    let _ = events.send(TransportEvent::ConnectFailed(failure)).await;
                    break;
                }

                if connected {
                    connected = false;
                    warn!("[MQTT] Connection lost: {}", err);
                    if events
                        .send(TransportEvent::Lost {
                            reason: err.to_string(),
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                } else {
                    debug!("[MQTT] Reconnect attempt failed: {}", err);
                }

                tokio::select! {
                    _ = tokio::time::sleep(reconnect_delay) => {}
                    _ = shutdown.changed() => break,
                }

                // Exponential backoff
                reconnect_delay = std::cmp::min(reconnect_delay * 2, backoff.max);
                continue;
            }
        };

        if events.send(event).await.is_err() {
            break;
        }
    }

    debug!("[MQTT] Event loop stopped");
}
