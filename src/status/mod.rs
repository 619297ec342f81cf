//! Best-effort status reporting

mod reporter;

pub use reporter::StatusReporter;
