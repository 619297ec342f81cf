//! Connection State Machine
//!
//! Defines valid broker-session state transitions. The session manager is the
//! only caller; observers only ever see the resulting states.

use std::fmt;

/// Broker session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Link dropped after a handshake; the transport is retrying
    Lost,
}

impl ConnectionState {
    /// Whether a transport currently exists for this session
    pub fn is_active(self) -> bool {
        !matches!(self, ConnectionState::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Lost => "lost",
        };
        f.write_str(name)
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// A caller asked for a new connection
    ConnectRequested,
    /// Broker accepted the handshake (first connect or reconnect)
    Established,
    /// Established link dropped
    Lost,
    /// A handshake attempt failed
    AttemptFailed,
    /// A caller asked to tear the session down
    DisconnectRequested,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// State changed
    Changed {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Event was valid but did not move the state
    Unchanged(ConnectionState),
    /// Event is not allowed from the current state
    Rejected {
        from: ConnectionState,
        event: LinkEvent,
    },
}

/// The state machine for one broker session
#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    current_state: ConnectionState,
}

impl ConnectionStateMachine {
    /// Create a new state machine in Disconnected state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.current_state
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LinkEvent) -> TransitionResult {
        let from = self.current_state;

        match self.next_state(event) {
            Some(to) if to == from => TransitionResult::Unchanged(from),
            Some(to) => {
                self.current_state = to;
                TransitionResult::Changed { from, to }
            }
            None => TransitionResult::Rejected { from, event },
        }
    }

    fn next_state(&self, event: LinkEvent) -> Option<ConnectionState> {
        use ConnectionState as S;
        use LinkEvent as E;

        match (self.current_state, event) {
            (S::Disconnected, E::ConnectRequested) => Some(S::Connecting),
            (S::Connecting | S::Connected | S::Lost, E::ConnectRequested) => None,

            (S::Connecting | S::Connected | S::Lost, E::Established) => Some(S::Connected),
            (S::Disconnected, E::Established) => None,

            (S::Connecting | S::Connected | S::Lost, E::Lost) => Some(S::Lost),
            (S::Disconnected, E::Lost) => None,

            // Before the first handshake a failure ends the attempt; after it
            // the transport keeps retrying on its own.
            (S::Connecting, E::AttemptFailed) => Some(S::Disconnected),
            (S::Lost, E::AttemptFailed) => Some(S::Lost),
            (S::Connected | S::Disconnected, E::AttemptFailed) => None,

            (_, E::DisconnectRequested) => Some(S::Disconnected),
        }
    }
}
