//! Privileged action execution
//!
//! This module handles:
//! - Checking that the privileged shell is reachable and permitted
//! - The disable / settle / enable sequence for mobile data
//! - Running shell commands through an external privilege broker

mod controller;
pub mod shell;

#[cfg(test)]
pub(crate) use controller::test_support;
pub use controller::{ActionOutcome, DataCommands, MobileDataController, NetworkAction};
pub use shell::{ProcessShell, ShellConfig};
