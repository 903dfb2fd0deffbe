//! Streaming JSON protocol spoken by the agent binary.
//!
//! The core forwards every output line untouched and only inspects the
//! `type` discriminator so that assistant turns can be appended to history.
//! Any shape not listed here classifies as [`AgentRecord::Unknown`].
//!
//! | `type`      | Maps to                          | Side effect          |
//! |-------------|----------------------------------|----------------------|
//! | `assistant` | [`AgentRecord::Assistant`]       | history append       |
//! | `user`      | [`AgentRecord::User`]            | none                 |
//! | `system`    | [`AgentRecord::System`]          | none                 |
//! | `result`    | [`AgentRecord::Result`]          | none                 |
//! | *(other)*   | [`AgentRecord::Unknown`]         | none                 |

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminated view over one decoded stdout record.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentRecord {
    /// An assistant turn; `message` carries the turn payload.
    Assistant {
        /// Turn payload, absent or null for partial records.
        #[serde(default)]
        message: Option<Value>,
    },
    /// Echo of a user turn.
    User {
        /// Turn payload.
        #[serde(default)]
        message: Option<Value>,
    },
    /// Agent lifecycle notice (init, hooks, …).
    System {
        /// Notice subtype.
        #[serde(default)]
        subtype: Option<String>,
    },
    /// End-of-turn summary.
    Result {
        /// Result subtype (`success`, `error_max_turns`, …).
        #[serde(default)]
        subtype: Option<String>,
        /// Whether the turn ended in error.
        #[serde(default)]
        is_error: bool,
    },
    /// Any other shape; the raw value stays with the caller.
    #[serde(skip)]
    Unknown,
}

impl AgentRecord {
    /// Classify a decoded value. Never fails.
    #[must_use]
    pub fn classify(value: &Value) -> Self {
        Self::deserialize(value).unwrap_or(Self::Unknown)
    }

    /// Assistant payload to append to history, when this record carries one.
    #[must_use]
    pub fn history_message(&self) -> Option<&Value> {
        match self {
            Self::Assistant {
                message: Some(message),
            } if !message.is_null() => Some(message),
            _ => None,
        }
    }
}

/// Body of a user turn written to the agent's stdin.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TurnMessage {
    /// Always `user`.
    pub role: &'static str,
    /// Opaque content supplied by the client.
    pub content: Value,
}

/// One user turn, serialised as a single stdin line.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserTurn {
    /// Always `user`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Turn body.
    pub message: TurnMessage,
}

impl UserTurn {
    /// Wrap client content as a user turn.
    #[must_use]
    pub fn new(content: Value) -> Self {
        Self {
            kind: "user",
            message: TurnMessage {
                role: "user",
                content,
            },
        }
    }

    /// JSON value handed to the stdin writer.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "type": self.kind,
            "message": {
                "role": self.message.role,
                "content": self.message.content,
            },
        })
    }
}
