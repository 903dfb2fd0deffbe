//! Session model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a resident session supervisor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Constructed; no start attempted yet.
    Created,
    /// Start attempted; no live process yet.
    Starting,
    /// Process live (or last start succeeded) and owned by the active pool.
    Running,
    /// Process live with no attached transport; owned by the background pool.
    Detached,
    /// Terminal: process killed and the instance dropped from every pool.
    Stopped,
}

impl SessionState {
    /// Determine whether a lifecycle transition is permitted.
    ///
    /// `Starting → Starting` is allowed so a failed start can be retried.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created | Self::Starting, Self::Starting)
                | (Self::Starting | Self::Detached, Self::Running)
                | (Self::Running, Self::Detached | Self::Starting)
                | (
                    Self::Created | Self::Starting | Self::Running | Self::Detached,
                    Self::Stopped
                )
        )
    }
}

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Turn sent by the client.
    User,
    /// Turn produced by the agent.
    Assistant,
}

/// One turn in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Turn author.
    pub role: Role,
    /// Opaque payload forwarded to or from the agent.
    pub content: Value,
    /// Time the turn was appended.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Stamp a new message with the current time.
    #[must_use]
    pub fn new(role: Role, content: Value) -> Self {
        Self {
            role,
            content,
            timestamp: Utc::now(),
        }
    }
}

/// Persisted history of one session, keyed by id in `sessions.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Append-ordered conversation turns.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Optional project binding; immutable after creation.
    #[serde(default)]
    pub project_id: Option<u64>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Refreshed on every appended message.
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Empty history stamped with the current time.
    #[must_use]
    pub fn new(project_id: Option<u64>) -> Self {
        let now = Utc::now();
        Self {
            messages: Vec::new(),
            project_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message, keeping `updated_at` non-decreasing even if the wall
    /// clock steps backwards.
    pub fn append(&mut self, message: Message) {
        if message.timestamp > self.updated_at {
            self.updated_at = message.timestamp;
        }
        self.messages.push(message);
    }
}

/// List-view projection of a session record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session identifier.
    pub id: u64,
    /// Optional project binding.
    pub project_id: Option<u64>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last activity timestamp.
    pub updated_at: DateTime<Utc>,
    /// Number of persisted messages.
    pub message_count: usize,
}

impl SessionSummary {
    /// Project a record into its summary.
    #[must_use]
    pub fn from_record(id: u64, record: &SessionRecord) -> Self {
        Self {
            id,
            project_id: record.project_id,
            created_at: record.created_at,
            updated_at: record.updated_at,
            message_count: record.messages.len(),
        }
    }
}
