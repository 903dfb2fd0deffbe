//! Agent process plumbing.
//!
//! This module owns everything between a supervisor and its child process:
//! - `launcher`: process spawning with environment isolation and stdio capture.
//! - `codec`: newline framing of the child's byte streams into [`codec::Line`]s.
//! - `protocol`: the subset of the streaming JSON protocol the core inspects.
//! - `reader`: async read tasks turning stdout/stderr into [`AgentEvent`]s.
//! - `writer`: async write task serialising user turns onto stdin.
//! - `monitor`: exit monitoring and fire-and-forget kill.

pub mod codec;
pub mod launcher;
pub mod monitor;
pub mod protocol;
pub mod reader;
pub mod writer;

use codec::Line;

/// Which of the child's output pipes a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard output: the structured protocol stream.
    Stdout,
    /// Standard error: diagnostics, forwarded and logged.
    Stderr,
}

/// Events emitted by the per-process tasks into the supervisor's pump.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// One complete line read from a child pipe.
    Output {
        /// Source pipe.
        stream: StreamKind,
        /// Framed, best-effort decoded line.
        line: Line,
    },
    /// The child process terminated and both pipes have drained.
    Exited {
        /// Process exit code, if available.
        code: Option<i32>,
        /// Human-readable reason for termination.
        reason: String,
    },
}
