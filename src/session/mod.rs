//! Session supervision.
//!
//! - `output`: per-session replay cache and fan-out to the attached transport.
//! - `supervisor`: one session's process lifecycle and history.
//! - `registry`: the active/background/history pools and request routing.

pub mod output;
pub mod registry;
pub mod supervisor;

use std::time::Duration;

use crate::agent::launcher::LaunchSpec;

pub use output::{Multiplexer, TransportSender};
pub use registry::{SessionRegistry, StopOutcome};
pub use supervisor::Supervisor;

/// Bounded restart-then-retry policy for stdin writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Restart attempts before the message is reported undeliverable.
    pub max_attempts: u32,
    /// Wait between a restart and the retried send.
    pub delay: Duration,
}

/// Settings shared by the registry and every supervisor it creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// How to launch the agent.
    pub launch: LaunchSpec,
    /// Keep the process running after the transport disconnects.
    pub keep_running_in_background: bool,
    /// Delay between a stream attaching and the first process start.
    pub start_delay: Duration,
    /// Restart-then-retry policy for sends against a missing process.
    pub send_retry: RetryPolicy,
    /// Config file path quoted in diagnostics.
    pub config_hint: Option<String>,
}
