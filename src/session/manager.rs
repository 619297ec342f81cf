//! Session manager owning the broker connection lifecycle
//!
//! The manager is the only owner of the transport handle and of the
//! connection state. Transport events are consumed by one task per
//! connection, in arrival order; events from a torn-down transport are
//! recognised by their generation and dropped.

use crate::error::{ConnectFailure, PublishError, SessionError};
use crate::status::StatusReporter;
use crate::transport::{
    BrokerAddress, BrokerConnector, BrokerLink, LinkOptions, Qos, TransportEvent, TransportEvents,
};
use bytes::Bytes;
use restart4g_shared::{
    identity, now_ms, timing, ConnectionState, ConnectionStateMachine, LinkEvent,
    RegistrationRecord, Status, Topics, TransitionResult,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Events emitted by the session manager for observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection state moved
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Broker accepted the handshake
    Established { server: String, reconnect: bool },
    /// First handshake failed; the session is Disconnected again
    ConnectFailed(ConnectFailure),
    /// Established link dropped; the transport is retrying
    ConnectionLost { reason: String },
    /// Command topic subscription was not accepted
    SubscribeFailed { topic: String, reason: String },
}

/// Raw inbound publish, passed through unparsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Receiving side of the inbound message stream
pub type MessageReceiver = mpsc::UnboundedReceiver<InboundMessage>;

/// Identity of one connect() call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub client_id: String,
    pub address: BrokerAddress,
    pub persistent: bool,
}

/// Configuration for the session manager
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Device identifier carried in the registration record
    pub device_id: String,
    /// Prefix of generated client identities
    pub client_prefix: String,
    pub topics: Topics,
    pub link: LinkOptions,
    /// Pause between handshake and registration
    pub registration_delay: Duration,
    /// Pause between registration and the `connected` status
    pub connected_status_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_id: identity::DEFAULT_DEVICE_ID.into(),
            client_prefix: identity::DEFAULT_CLIENT_PREFIX.into(),
            topics: Topics::default(),
            link: LinkOptions::default(),
            registration_delay: Duration::from_millis(timing::REGISTRATION_DELAY_MS),
            connected_status_delay: Duration::from_millis(timing::CONNECTED_STATUS_DELAY_MS),
        }
    }
}

struct SessionInner {
    fsm: ConnectionStateMachine,
    session: Option<Session>,
    link: Option<Arc<dyn BrokerLink>>,
    /// Bumped on every connect and teardown
    generation: u64,
    /// Staggered registration/status publishes for the current handshake
    announce: Option<JoinHandle<()>>,
}

impl SessionInner {
    fn teardown(&mut self) -> Option<Arc<dyn BrokerLink>> {
        self.generation += 1;
        if let Some(task) = self.announce.take() {
            task.abort();
        }
        self.session = None;
        self.link.take()
    }
}

/// Non-owning publish capability over the managed session
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<RwLock<SessionInner>>,
}

impl SessionHandle {
    /// Publish on the live link.
    ///
    /// Fails with `NotConnected` unless the session is Connected; never
    /// queues for later.
    pub async fn publish(&self, topic: &str, qos: Qos, payload: Bytes) -> Result<(), PublishError> {
        let link = {
            let inner = self.shared.read().await;
            if inner.fsm.state() != ConnectionState::Connected {
                return Err(PublishError::NotConnected);
            }
            inner.link.clone().ok_or(PublishError::NotConnected)?
        };

        link.publish(topic, qos, payload)?;
        Ok(())
    }
}

/// Owns the broker session: connect, subscribe, detect loss, disconnect
pub struct SessionManager {
    config: SessionConfig,
    connector: Arc<dyn BrokerConnector>,
    shared: Arc<RwLock<SessionInner>>,
    events: broadcast::Sender<SessionEvent>,
    messages: mpsc::UnboundedSender<InboundMessage>,
}

impl SessionManager {
    /// Create a session manager in Disconnected state.
    ///
    /// Returns the manager and the stream of inbound messages.
    pub fn new(config: SessionConfig, connector: Arc<dyn BrokerConnector>) -> (Self, MessageReceiver) {
        let (events, _) = broadcast::channel(100);
        let (messages, message_rx) = mpsc::unbounded_channel();

        let manager = Self {
            config,
            connector,
            shared: Arc::new(RwLock::new(SessionInner {
                fsm: ConnectionStateMachine::new(),
                session: None,
                link: None,
                generation: 0,
                announce: None,
            })),
            events,
            messages,
        };

        (manager, message_rx)
    }

    /// Get a publish handle for the status reporter
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: self.shared.clone(),
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current connection state
    pub async fn state(&self) -> ConnectionState {
        self.shared.read().await.fsm.state()
    }

    /// Identity of the current session, if any
    pub async fn session(&self) -> Option<Session> {
        self.shared.read().await.session.clone()
    }

    /// Open a new broker session.
    ///
    /// Address and transport construction errors are returned here; the
    /// handshake outcome arrives later as a [`SessionEvent`].
    pub async fn connect(&self, address: &str) -> Result<Session, SessionError> {
        let address = BrokerAddress::parse(address)?;

        let mut inner = self.shared.write().await;
        if inner.fsm.state().is_active() {
            return Err(SessionError::AlreadyActive);
        }

        let client_id = format!("{}-{}", self.config.client_prefix, now_ms());
        let (link, transport) = self
            .connector
            .open(&address, &client_id, &self.config.link)?;

        let session = Session {
            client_id: client_id.clone(),
            address: address.clone(),
            persistent: self.config.link.persistent_session,
        };

        inner.generation += 1;
        inner.link = Some(link);
        inner.session = Some(session.clone());
        let transition = inner.fsm.process_event(LinkEvent::ConnectRequested);
        let generation = inner.generation;
        drop(inner);

        emit_transition(&self.events, transition);
        info!("[SESSION] Connecting to {} as {}", address, client_id);

        let task = SessionTask {
            shared: self.shared.clone(),
            events: self.events.clone(),
            messages: self.messages.clone(),
            reporter: StatusReporter::new(self.handle(), self.config.topics.clone()),
            config: self.config.clone(),
            generation,
            client_id,
            server: address.to_string(),
        };
        tokio::spawn(async move {
            task.run(transport).await;
        });

        Ok(session)
    }

    /// Tear the session down. A no-op when already Disconnected.
    pub async fn disconnect(&self) {
        let (link, transition) = {
            let mut inner = self.shared.write().await;
            if !inner.fsm.state().is_active() {
                return;
            }
            let link = inner.teardown();
            (link, inner.fsm.process_event(LinkEvent::DisconnectRequested))
        };

        emit_transition(&self.events, transition);

        if let Some(link) = link {
            if let Err(e) = link.disconnect().await {
                debug!("[SESSION] Transport close reported: {}", e);
            }
        }
        info!("[SESSION] Disconnected");
    }
}

fn emit_transition(events: &broadcast::Sender<SessionEvent>, transition: TransitionResult) {
    match transition {
        TransitionResult::Changed { from, to } => {
            info!("[SESSION] {} -> {}", from, to);
            let _ = events.send(SessionEvent::StateChanged { from, to });
        }
        TransitionResult::Unchanged(_) => {}
        TransitionResult::Rejected { from, event } => {
            debug!("[SESSION] Ignored {:?} while {}", event, from);
        }
    }
}

/// Per-connection consumer of transport events
struct SessionTask {
    shared: Arc<RwLock<SessionInner>>,
    events: broadcast::Sender<SessionEvent>,
    messages: mpsc::UnboundedSender<InboundMessage>,
    reporter: StatusReporter,
    config: SessionConfig,
    generation: u64,
    client_id: String,
    server: String,
}

impl SessionTask {
    async fn run(self, mut transport: TransportEvents) {
        let mut reconnect = false;

        while let Some(event) = transport.recv().await {
            let current = match event {
                TransportEvent::Established { session_present } => {
                    debug!("[SESSION] Handshake accepted (session_present={})", session_present);
                    let current = self.on_established(reconnect).await;
                    reconnect = true;
                    current
                }
                TransportEvent::Lost { reason } => self.on_lost(reason).await,
                TransportEvent::ConnectFailed(failure) => {
                    self.on_connect_failed(failure).await;
                    break;
                }
                TransportEvent::Message { topic, payload } => {
                    let current = self.is_current().await;
                    if current {
                        debug!("[SESSION] Message on {} ({} bytes)", topic, payload.len());
                        let _ = self.messages.send(InboundMessage { topic, payload });
                    }
                    current
                }
            };

            if !current {
                debug!("[SESSION] Dropping events from a closed transport");
                return;
            }
        }

        self.on_closed().await;
    }

    async fn is_current(&self) -> bool {
        self.shared.read().await.generation == self.generation
    }

    async fn on_established(&self, reconnect: bool) -> bool {
        let (transition, link) = {
            let mut inner = self.shared.write().await;
            if inner.generation != self.generation {
                return false;
            }
            if let Some(task) = inner.announce.take() {
                task.abort();
            }
            (
                inner.fsm.process_event(LinkEvent::Established),
                inner.link.clone(),
            )
        };

        emit_transition(&self.events, transition);
        info!("[SESSION] Connected to {}", self.server);
        let _ = self.events.send(SessionEvent::Established {
            server: self.server.clone(),
            reconnect,
        });

        // Subscribe on every handshake so a reconnect never leaves the
        // command topic unsubscribed.
        let topic = &self.config.topics.command;
        if let Some(link) = link {
            match link.subscribe(topic, Qos::AtLeastOnce).await {
                Ok(()) => info!("[SESSION] Subscribed to {}", topic),
                Err(e) => {
                    warn!("[SESSION] Subscribe to {} failed: {}", topic, e);
                    let _ = self.events.send(SessionEvent::SubscribeFailed {
                        topic: topic.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let announce = tokio::spawn(announce(
            self.reporter.clone(),
            RegistrationRecord::new(self.config.device_id.clone(), self.client_id.clone()),
            self.config.registration_delay,
            self.config.connected_status_delay,
        ));

        let mut inner = self.shared.write().await;
        if inner.generation == self.generation && inner.fsm.state() == ConnectionState::Connected {
            inner.announce = Some(announce);
        } else {
            announce.abort();
        }
        true
    }

    async fn on_lost(&self, reason: String) -> bool {
        let transition = {
            let mut inner = self.shared.write().await;
            if inner.generation != self.generation {
                return false;
            }
            if let Some(task) = inner.announce.take() {
                task.abort();
            }
            inner.fsm.process_event(LinkEvent::Lost)
        };

        warn!("[SESSION] Connection lost: {}", reason);
        emit_transition(&self.events, transition);
        let _ = self.events.send(SessionEvent::ConnectionLost { reason });
        true
    }

    async fn on_connect_failed(&self, failure: ConnectFailure) {
        let transition = {
            let mut inner = self.shared.write().await;
            if inner.generation != self.generation {
                return;
            }
            let transition = inner.fsm.process_event(LinkEvent::AttemptFailed);
            if !inner.fsm.state().is_active() {
                inner.teardown();
            }
            transition
        };

        warn!("[SESSION] Connect to {} failed: {}", self.server, failure);
        emit_transition(&self.events, transition);
        let _ = self.events.send(SessionEvent::ConnectFailed(failure));
    }

    /// The transport stopped on its own
    async fn on_closed(&self) {
        let transition = {
            let mut inner = self.shared.write().await;
            if inner.generation != self.generation || !inner.fsm.state().is_active() {
                return;
            }
            inner.teardown();
            inner.fsm.process_event(LinkEvent::DisconnectRequested)
        };

        warn!("[SESSION] Transport to {} closed", self.server);
        emit_transition(&self.events, transition);
        let _ = self.events.send(SessionEvent::ConnectionLost {
            reason: "transport closed".into(),
        });
    }
}

/// Registration, then the initial `connected` status, staggered so a fresh
/// link does not receive a burst right after the handshake.
async fn announce(
    reporter: StatusReporter,
    record: RegistrationRecord,
    registration_delay: Duration,
    connected_status_delay: Duration,
) {
    tokio::time::sleep(registration_delay).await;
    reporter.register(&record).await;

    tokio::time::sleep(connected_status_delay).await;
    reporter.report(&Status::Connected).await;
}


#[cfg(test)]
mod tests {
    use super::test_support::wait_for_state;
    use super::*;
    use crate::error::FailureKind;
    use crate::transport::mock::MockConnector;
    use crate::transport::TransportError;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::time::Instant;

    fn manager() -> (
        SessionManager,
        MessageReceiver,
        mpsc::UnboundedReceiver<crate::transport::mock::MockRemote>,
    ) {
        let (connector, remotes) = MockConnector::new();
        let (manager, messages) = SessionManager::new(SessionConfig::default(), Arc::new(connector));
        (manager, messages, remotes)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.device_id, "oppo-device");
        assert_eq!(config.client_prefix, "oppo");
        assert_eq!(config.registration_delay, Duration::from_millis(500));
        assert_eq!(config.connected_status_delay, Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_address() {
        let (manager, _messages, mut remotes) = manager();

        for address in ["", "   ", "not an address", "ssl://broker.example:8883"] {
            assert!(matches!(
                manager.connect(address).await,
                Err(SessionError::InvalidAddress(_))
            ));
        }

        assert_eq!(manager.state().await, ConnectionState::Disconnected);
        assert!(remotes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_second_connect_is_already_active() {
        let (manager, _messages, mut remotes) = manager();
        let mut events = manager.subscribe();

        let session = manager.connect("tcp://broker.example:1883").await.unwrap();
        assert_eq!(
            manager.connect("tcp://broker.example:1883").await,
            Err(SessionError::AlreadyActive)
        );
        assert_eq!(
            manager.connect("tcp://other.example:1883").await,
            Err(SessionError::AlreadyActive)
        );

        // Only the first attempt opened a transport and it is unaffected
        let remote = remotes.recv().await.unwrap();
        assert!(remotes.try_recv().is_err());
        assert_eq!(manager.session().await, Some(session));
        assert_eq!(manager.state().await, ConnectionState::Connecting);

        remote.accept().await;
        wait_for_state(&mut events, ConnectionState::Connected).await;
        assert_eq!(
            manager.connect("tcp://broker.example:1883").await,
            Err(SessionError::AlreadyActive)
        );
    }

    #[tokio::test]
    async fn test_concurrent_connects_open_one_transport() {
        let (manager, _messages, mut remotes) = manager();
        let manager = Arc::new(manager);

        let a = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect("tcp://broker.example:1883").await }
        });
        let b = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect("tcp://broker.example:1883").await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.contains(&Err(SessionError::AlreadyActive)));
        assert!(remotes.recv().await.is_some());
        assert!(remotes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_session_identity_and_link_options() {
        let (manager, _messages, mut remotes) = manager();

        let session = manager.connect("tcp://broker.example:1883").await.unwrap();
        let remote = remotes.recv().await.unwrap();

        assert!(session.client_id.starts_with("oppo-"));
        assert!(session.persistent);
        assert_eq!(remote.client_id, session.client_id);
        assert_eq!(remote.address.host(), "broker.example");
        assert_eq!(remote.address.port(), 1883);
        assert_eq!(remote.options, LinkOptions::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_scenario_announces_with_stagger() {
        let (manager, _messages, mut remotes) = manager();
        let mut events = manager.subscribe();
        assert_eq!(manager.state().await, ConnectionState::Disconnected);

        let session = manager.connect("tcp://broker.example:1883").await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::StateChanged {
                from: ConnectionState::Disconnected,
                to: ConnectionState::Connecting,
            }
        );

        let mut remote = remotes.recv().await.unwrap();
        remote.accept().await;
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::StateChanged {
                from: ConnectionState::Connecting,
                to: ConnectionState::Connected,
            }
        );
        let connected_at = Instant::now();

        let registration = remote.next_publish().await;
        let since_connected = registration.at - connected_at;
        assert!(since_connected >= Duration::from_millis(500), "{:?}", since_connected);
        assert!(since_connected <= Duration::from_millis(1500), "{:?}", since_connected);
        assert_eq!(registration.topic, "device/register");
        assert_eq!(registration.qos, Qos::AtLeastOnce);
        let record: RegistrationRecord = serde_json::from_slice(&registration.payload).unwrap();
        assert_eq!(record, RegistrationRecord::new("oppo-device", session.client_id.clone()));

        let status = remote.next_publish().await;
        let since_registration = status.at - registration.at;
        assert!(since_registration >= Duration::from_millis(2000), "{:?}", since_registration);
        assert!(since_registration <= Duration::from_millis(3000), "{:?}", since_registration);
        assert_eq!(status.topic, "device/oppo/status");
        assert_eq!(status.text(), "connected");

        assert_eq!(
            remote.link.subscriptions(),
            vec![("device/oppo/restart4g".to_string(), Qos::AtLeastOnce)]
        );
    }

    #[tokio::test]
    async fn test_disconnect_when_disconnected_is_noop() {
        let (manager, _messages, _remotes) = manager();
        let mut events = manager.subscribe();

        manager.disconnect().await;
        manager.disconnect().await;

        assert_eq!(manager.state().await, ConnectionState::Disconnected);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_disconnect_closes_transport() {
        let (manager, _messages, mut remotes) = manager();
        let mut events = manager.subscribe();

        manager.connect("tcp://broker.example:1883").await.unwrap();
        let remote = remotes.recv().await.unwrap();
        remote.accept().await;
        wait_for_state(&mut events, ConnectionState::Connected).await;

        manager.disconnect().await;
        wait_for_state(&mut events, ConnectionState::Disconnected).await;

        assert_eq!(remote.link.disconnects(), 1);
        assert_eq!(manager.session().await, None);
        assert!(matches!(
            manager
                .handle()
                .publish("device/oppo/status", Qos::AtLeastOnce, Bytes::from_static(b"x"))
                .await,
            Err(PublishError::NotConnected)
        ));

        // A fresh connect is allowed again
        manager.connect("tcp://broker.example:1883").await.unwrap();
        assert!(remotes.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_disconnect_while_connecting() {
        let (manager, _messages, mut remotes) = manager();

        manager.connect("tcp://broker.example:1883").await.unwrap();
        let remote = remotes.recv().await.unwrap();
        manager.disconnect().await;

        assert_eq!(manager.state().await, ConnectionState::Disconnected);
        assert_eq!(remote.link.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_stale_events_ignored_after_disconnect() {
        let (manager, _messages, mut remotes) = manager();

        manager.connect("tcp://broker.example:1883").await.unwrap();
        let remote = remotes.recv().await.unwrap();
        manager.disconnect().await;

        remote.accept().await;
        settle().await;

        assert_eq!(manager.state().await, ConnectionState::Disconnected);
        assert!(remote.link.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_message_after_disconnect_is_not_forwarded() {
        let (manager, mut messages, mut remotes) = manager();
        let mut events = manager.subscribe();

        manager.connect("tcp://broker.example:1883").await.unwrap();
        let remote = remotes.recv().await.unwrap();
        remote.accept().await;
        wait_for_state(&mut events, ConnectionState::Connected).await;

        manager.disconnect().await;
        remote.deliver("device/oppo/restart4g", "restart4g").await;
        settle().await;

        assert!(messages.try_recv().is_err());
        assert_eq!(manager.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connection_lost_and_recovered() {
        let (manager, _messages, mut remotes) = manager();
        let mut events = manager.subscribe();

        manager.connect("tcp://broker.example:1883").await.unwrap();
        let remote = remotes.recv().await.unwrap();
        remote.accept().await;
        wait_for_state(&mut events, ConnectionState::Connected).await;

        remote
            .events
            .send(TransportEvent::Lost {
                reason: "keep-alive timeout".into(),
            })
            .await
            .unwrap();
        wait_for_state(&mut events, ConnectionState::Lost).await;
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::ConnectionLost {
                reason: "keep-alive timeout".into()
            }
        );

        // Still active while the transport retries
        assert_eq!(
            manager.connect("tcp://broker.example:1883").await,
            Err(SessionError::AlreadyActive)
        );

        remote.accept().await;
        wait_for_state(&mut events, ConnectionState::Connected).await;
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Established { reconnect: true, .. }
        ));
        assert_eq!(remote.link.subscriptions().len(), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_disconnected() {
        let (manager, _messages, mut remotes) = manager();
        let mut events = manager.subscribe();

        manager.connect("tcp://broker.example:1883").await.unwrap();
        let remote = remotes.recv().await.unwrap();
        remote
            .events
            .send(TransportEvent::ConnectFailed(ConnectFailure::new(
                FailureKind::Refused,
                "Connection refused (os error 111)",
            )))
            .await
            .unwrap();

        wait_for_state(&mut events, ConnectionState::Disconnected).await;
        match events.recv().await.unwrap() {
            SessionEvent::ConnectFailed(failure) => assert_eq!(failure.kind, FailureKind::Refused),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(manager.session().await, None);

        manager.connect("tcp://broker.example:1883").await.unwrap();
    }

    #[tokio::test]
    async fn test_transport_construction_error_is_synchronous() {
        let (connector, _remotes) = MockConnector::new();
        connector.fail_next_open(TransportError::InvalidAddress("port 0".into()));
        let (manager, _messages) = SessionManager::new(SessionConfig::default(), Arc::new(connector));

        assert_eq!(
            manager.connect("tcp://broker.example:1883").await,
            Err(SessionError::InvalidAddress("port 0".into()))
        );
        assert_eq!(manager.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_transport_closing_on_its_own_disconnects() {
        let (manager, _messages, mut remotes) = manager();
        let mut events = manager.subscribe();

        manager.connect("tcp://broker.example:1883").await.unwrap();
        let remote = remotes.recv().await.unwrap();
        remote.accept().await;
        wait_for_state(&mut events, ConnectionState::Connected).await;

        drop(remote);
        wait_for_state(&mut events, ConnectionState::Disconnected).await;
    }

    #[tokio::test]
    async fn test_publish_while_disconnected_is_not_connected() {
        let (manager, _messages, _remotes) = manager();
        let result = manager
            .handle()
            .publish("device/oppo/status", Qos::AtLeastOnce, Bytes::from_static(b"x"))
            .await;
        assert!(matches!(result, Err(PublishError::NotConnected)));
    }

    #[tokio::test]
    async fn test_publish_while_connecting_is_not_connected() {
        let (manager, _messages, mut remotes) = manager();
        manager.connect("tcp://broker.example:1883").await.unwrap();
        let mut remote = remotes.recv().await.unwrap();

        let result = manager
            .handle()
            .publish("device/oppo/status", Qos::AtLeastOnce, Bytes::from_static(b"x"))
            .await;
        assert!(matches!(result, Err(PublishError::NotConnected)));
        assert!(remote.published.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_inbound_messages_are_forwarded() {
        let (manager, mut messages, mut remotes) = manager();
        let mut events = manager.subscribe();

        manager.connect("tcp://broker.example:1883").await.unwrap();
        let remote = remotes.recv().await.unwrap();
        remote.accept().await;
        wait_for_state(&mut events, ConnectionState::Connected).await;

        remote.deliver("device/oppo/restart4g", " restart4g ").await;
        let message = messages.recv().await.unwrap();
        assert_eq!(message.topic, "device/oppo/restart4g");
        assert_eq!(message.payload, Bytes::from_static(b" restart4g "));
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_reported() {
        let (manager, _messages, mut remotes) = manager();
        let mut events = manager.subscribe();

        manager.connect("tcp://broker.example:1883").await.unwrap();
        let remote = remotes.recv().await.unwrap();
        remote.link.fail_subscriptions();
        remote.accept().await;

        let wait = async {
            loop {
                if let SessionEvent::SubscribeFailed { topic, .. } = events.recv().await.unwrap() {
                    return topic;
                }
            }
        };
        let topic = tokio::time::timeout(Duration::from_secs(5), wait).await.unwrap();
        assert_eq!(topic, "device/oppo/restart4g");
        assert_eq!(manager.state().await, ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loss_cancels_pending_announce() {
        let (manager, _messages, mut remotes) = manager();
        let mut events = manager.subscribe();

        manager.connect("tcp://broker.example:1883").await.unwrap();
        let mut remote = remotes.recv().await.unwrap();
        remote.accept().await;
        wait_for_state(&mut events, ConnectionState::Connected).await;

        remote
            .events
            .send(TransportEvent::Lost {
                reason: "reset".into(),
            })
            .await
            .unwrap();
        wait_for_state(&mut events, ConnectionState::Lost).await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(remote.published.try_recv().is_err());
    }
}
