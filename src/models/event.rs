//! Events delivered toward client transports.
//!
//! Every event is serialised as one JSON object tagged by `type`, which is
//! the exact body of an SSE `data:` frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::codec::Line;

/// Payload of an output event: a decoded JSON value or a raw text line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OutputData {
    /// Line decoded as JSON.
    Structured(Value),
    /// Line that was not valid JSON, or supervisor-generated text.
    Text(String),
}

impl From<Line> for OutputData {
    fn from(line: Line) -> Self {
        match line {
            Line::Structured(value) => Self::Structured(value),
            Line::Raw(text) => Self::Text(text),
        }
    }
}

/// One unit of output queued for delivery and replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A transport attached to the session.
    Connected {
        /// Resolved session identifier.
        #[serde(rename = "sessionId")]
        session_id: u64,
    },
    /// One line of agent output, or a synthesized diagnostic.
    #[serde(rename = "claude_output")]
    AgentOutput {
        /// Decoded payload.
        data: OutputData,
    },
    /// The agent process exited.
    #[serde(rename = "claude_closed")]
    AgentClosed {
        /// Exit code; `None` when terminated by a signal.
        code: Option<i32>,
    },
    /// Configuration, spawn, or delivery failure.
    Error {
        /// Human-readable description.
        message: String,
    },
}

impl Event {
    /// Output event carrying plain text.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::AgentOutput {
            data: OutputData::Text(text.into()),
        }
    }

    /// Output event for one framed agent line.
    #[must_use]
    pub fn output(line: Line) -> Self {
        Self::AgentOutput { data: line.into() }
    }

    /// Error event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether this is a control event rather than agent payload.
    #[must_use]
    pub fn is_control(&self) -> bool {
        !matches!(self, Self::AgentOutput { .. })
    }
}
