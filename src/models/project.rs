//! Project records: a named filesystem path a session may be bound to.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Project entity persisted in `projects.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Unique identifier.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Working directory for agent processes bound to this project.
    pub path: PathBuf,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Construct a new project stamped with the current time.
    #[must_use]
    pub fn new(id: u64, name: String, path: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            path,
            created_at: now,
            updated_at: now,
        }
    }
}
