//! Broker session management
//!
//! This module handles:
//! - Connecting to the broker and generating the per-session identity
//! - Subscribing to the command topic on every handshake
//! - Observing loss and automatic reconnection by the transport
//! - Staggered registration and status announcements

mod manager;

#[cfg(test)]
pub(crate) use manager::test_support;
pub use manager::{MessageReceiver, SessionConfig, SessionEvent, SessionHandle, SessionManager};
