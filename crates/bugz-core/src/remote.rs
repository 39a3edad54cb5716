//! Bug representation handed over by the remote tracker client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("bug {0} not found")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed bug {bug_id}: {reason}")]
    Malformed { bug_id: String, reason: String },
}

/// Anything that can hand over a fully fetched bug. Fetching is a single
/// synchronous call per bug; retries belong to the implementation.
pub trait BugSource {
    fn fetch(&self, bug_id: &str) -> Result<RemoteBug, SourceError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePerson {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBug {
    pub id: String,
    pub title: String,
    pub owner: RemotePerson,
    #[serde(default)]
    pub date_created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_last_message: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_made_private: Option<DateTime<Utc>>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub security_related: bool,
    #[serde(default)]
    pub is_expirable: bool,
    #[serde(default)]
    pub duplicate_of: Option<String>,
    #[serde(default)]
    pub heat: i64,
    #[serde(default)]
    pub description: String,
    /// Iteration order matters; duplicates are possible.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<RemoteTask>,
    /// Chronologically ordered, append-only.
    #[serde(default)]
    pub activity: Vec<ActivityEntry>,
    #[serde(default)]
    pub messages: Vec<RemoteMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTask {
    pub bug_target_name: String,
    pub status: String,
    #[serde(default)]
    pub importance: String,
    #[serde(default)]
    pub assignee: Option<String>,
    pub owner: RemotePerson,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub milestone: Option<String>,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub date_created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_assigned: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_confirmed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_triaged: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_in_progress: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_fix_committed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_fix_released: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_incomplete: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_closed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_left_new: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_left_closed: Option<DateTime<Utc>>,
}

/// One field change from the bug's history, e.g.
/// `kernel-sru-workflow/prepare-package: status` -> `In Progress`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub what_changed: String,
    #[serde(default)]
    pub new_value: Option<String>,
    pub date_changed: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMessage {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub content: String,
    pub owner: RemotePerson,
    #[serde(default)]
    pub date_created: Option<DateTime<Utc>>,
}
