//! Command handling for the device agent
//!
//! This module handles:
//! - Decoding payloads received on the command topic
//! - Acknowledging commands on the status topic
//! - Queueing restarts onto a single action worker

mod dispatcher;

pub use dispatcher::{CommandDispatcher, DispatchEvent};
