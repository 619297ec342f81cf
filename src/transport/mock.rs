//! In-memory transport used by the unit tests
//!
//! Each `open` hands the test a [`MockRemote`], which plays the broker: it
//! injects transport events and observes what the agent subscribed and
//! published.

use super::address::BrokerAddress;
use super::traits::{
    BrokerConnector, BrokerLink, LinkOptions, Qos, TransportError, TransportEvent, TransportEvents,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// A publish observed by the mock broker
#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub qos: Qos,
    pub payload: Bytes,
    pub at: Instant,
}

impl Published {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Mock link recording agent-side requests
pub struct MockLink {
    subscriptions: Mutex<Vec<(String, Qos)>>,
    publish_tx: mpsc::UnboundedSender<Published>,
    closed: AtomicBool,
    fail_subscribe: AtomicBool,
    disconnects: AtomicUsize,
}

impl MockLink {
    pub fn subscriptions(&self) -> Vec<(String, Qos)> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn fail_subscriptions(&self) {
        self.fail_subscribe.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrokerLink for MockLink {
    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(TransportError::Request("subscribe rejected".into()));
        }
        self.subscriptions.lock().unwrap().push((topic.to_string(), qos));
        Ok(())
    }

    fn publish(&self, topic: &str, qos: Qos, payload: Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let _ = self.publish_tx.send(Published {
            topic: topic.to_string(),
            qos,
            payload,
            at: Instant::now(),
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Broker-side view of one opened transport
pub struct MockRemote {
    pub address: BrokerAddress,
    pub client_id: String,
    pub options: LinkOptions,
    pub events: mpsc::Sender<TransportEvent>,
    pub link: Arc<MockLink>,
    pub published: mpsc::UnboundedReceiver<Published>,
}

impl MockRemote {
    /// Simulate the broker accepting the handshake
    pub async fn accept(&self) {
        self.events
            .send(TransportEvent::Established {
                session_present: false,
            })
            .await
            .unwrap();
    }

    /// Simulate an inbound publish
    pub async fn deliver(&self, topic: &str, payload: &str) {
        self.events
            .send(TransportEvent::Message {
                topic: topic.to_string(),
                payload: Bytes::copy_from_slice(payload.as_bytes()),
            })
            .await
            .unwrap();
    }

    /// Next publish from the agent
    pub async fn next_publish(&mut self) -> Published {
        self.published.recv().await.expect("publish channel closed")
    }
}

/// Connector handing out mock links
pub struct MockConnector {
    opened: mpsc::UnboundedSender<MockRemote>,
    fail_with: Mutex<Option<TransportError>>,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockRemote>) {
        let (opened, remotes) = mpsc::unbounded_channel();
        (
            Self {
                opened,
                fail_with: Mutex::new(None),
            },
            remotes,
        )
    }

    /// Make the next `open` fail synchronously
    pub fn fail_next_open(&self, err: TransportError) {
        *self.fail_with.lock().unwrap() = Some(err);
    }
}

impl BrokerConnector for MockConnector {
    fn open(
        &self,
        address: &BrokerAddress,
        client_id: &str,
        options: &LinkOptions,
    ) -> Result<(Arc<dyn BrokerLink>, TransportEvents), TransportError> {
        if let Some(err) = self.fail_with.lock().unwrap().take() {
            return Err(err);
        }

        let (event_tx, event_rx) = mpsc::channel(100);
        let (publish_tx, publish_rx) = mpsc::unbounded_channel();
        let link = Arc::new(MockLink {
            subscriptions: Mutex::new(Vec::new()),
            publish_tx,
            closed: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
        });

        let _ = self.opened.send(MockRemote {
            address: address.clone(),
            client_id: client_id.to_string(),
            options: options.clone(),
            events: event_tx,
            link: link.clone(),
            published: publish_rx,
        });

        Ok((link, event_rx))
    }
}
