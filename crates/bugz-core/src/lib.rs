use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub mod cycle_stats;
pub mod decode;
pub mod reconcile;
pub mod remote;
pub mod timebase;
pub mod timeline;

pub use cycle_stats::{derive_cycle_stat, CycleStat, Mark, Stage, STAGES};
pub use reconcile::{reconcile, ReconcileError, ReconcileOptions};
pub use remote::{
    ActivityEntry, BugSource, RemoteBug, RemoteMessage, RemotePerson, RemoteTask, SourceError,
};
pub use timeline::{reconstruct, Timeline};

/// Project that owns the SRU workflow tasks on the tracker.
pub const WORKFLOW_PREFIX: &str = "kernel-sru-workflow";
pub const DEFAULT_VARIANT: &str = "debs";

/// Strips the workflow namespace from a tracker task name
/// (`kernel-sru-workflow/prepare-package` -> `prepare-package`).
pub fn normalize_task_name(name: &str) -> &str {
    name.strip_prefix(WORKFLOW_PREFIX)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskStatus {
    New,
    Incomplete,
    Opinion,
    Invalid,
    WontFix,
    Expired,
    Confirmed,
    Triaged,
    InProgress,
    Deferred,
    FixCommitted,
    FixReleased,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::New => "New",
            TaskStatus::Incomplete => "Incomplete",
            TaskStatus::Opinion => "Opinion",
            TaskStatus::Invalid => "Invalid",
            TaskStatus::WontFix => "Won't Fix",
            TaskStatus::Expired => "Expired",
            TaskStatus::Confirmed => "Confirmed",
            TaskStatus::Triaged => "Triaged",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Deferred => "Deferred",
            TaskStatus::FixCommitted => "Fix Committed",
            TaskStatus::FixReleased => "Fix Released",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input
            .trim()
            .to_lowercase()
            .replace('-', " ")
            .replace('_', " ");
        // The tracker reports "Incomplete (with response)" and friends.
        if normalized.starts_with("incomplete") {
            return Ok(TaskStatus::Incomplete);
        }
        match normalized.as_str() {
            "new" => Ok(TaskStatus::New),
            "opinion" => Ok(TaskStatus::Opinion),
            "invalid" => Ok(TaskStatus::Invalid),
            "won't fix" | "wont fix" | "wontfix" => Ok(TaskStatus::WontFix),
            "expired" => Ok(TaskStatus::Expired),
            "confirmed" => Ok(TaskStatus::Confirmed),
            "triaged" => Ok(TaskStatus::Triaged),
            "in progress" | "inprogress" => Ok(TaskStatus::InProgress),
            "deferred" => Ok(TaskStatus::Deferred),
            "fix committed" => Ok(TaskStatus::FixCommitted),
            "fix released" => Ok(TaskStatus::FixReleased),
            other => Err(format!("Unknown status: {other}")),
        }
    }
}

/// Seconds (in the [`timebase`]) at which a task entered each status.
/// Zero means the status was never seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDates {
    pub new: i64,
    pub incomplete: i64,
    pub opinion: i64,
    pub confirmed: i64,
    pub triaged: i64,
    pub in_progress: i64,
    pub fix_committed: i64,
    pub fix_released: i64,
    pub closed: i64,
    pub left_new: i64,
    pub left_closed: i64,
}

impl StatusDates {
    pub fn entered(&self, status: TaskStatus) -> i64 {
        match status {
            TaskStatus::New => self.new,
            TaskStatus::Incomplete => self.incomplete,
            TaskStatus::Opinion => self.opinion,
            TaskStatus::Confirmed => self.confirmed,
            TaskStatus::Triaged => self.triaged,
            TaskStatus::InProgress => self.in_progress,
            TaskStatus::FixCommitted => self.fix_committed,
            TaskStatus::FixReleased => self.fix_released,
            TaskStatus::Invalid
            | TaskStatus::WontFix
            | TaskStatus::Expired
            | TaskStatus::Deferred => 0,
        }
    }

    /// Returns false when the status has no slot and nothing was written.
    pub fn record(&mut self, status: TaskStatus, ts: i64) -> bool {
        let slot = match status {
            TaskStatus::New => &mut self.new,
            TaskStatus::Incomplete => &mut self.incomplete,
            TaskStatus::Opinion => &mut self.opinion,
            TaskStatus::Confirmed => &mut self.confirmed,
            TaskStatus::Triaged => &mut self.triaged,
            TaskStatus::InProgress => &mut self.in_progress,
            TaskStatus::FixCommitted => &mut self.fix_committed,
            TaskStatus::FixReleased => &mut self.fix_released,
            TaskStatus::Invalid
            | TaskStatus::WontFix
            | TaskStatus::Expired
            | TaskStatus::Deferred => return false,
        };
        *slot = ts;
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub status: String,
    pub importance: String,
    #[serde(default)]
    pub assignee: String,
    pub owner: String,
    pub title: String,
    #[serde(default)]
    pub milestone: String,
    pub is_complete: bool,
    pub date_created: i64,
    pub date_assigned: i64,
    #[serde(default)]
    pub dates: StatusDates,
}

impl Task {
    pub fn entered(&self, status: TaskStatus) -> i64 {
        self.dates.entered(status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub subject: String,
    pub content: String,
    pub owner: String,
    pub created: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bug {
    pub id: String,
    pub title: String,
    pub owner: String,
    pub owner_display_name: String,
    pub created: i64,
    pub last_message: i64,
    pub last_updated: i64,
    pub private: bool,
    pub security: bool,
    pub is_expirable: bool,
    pub duplicate: Option<String>,
    pub heat: i64,
    pub description: String,
    pub problem_type: String,
    pub master_bug_id: Option<String>,
    pub cycle: Option<String>,
    pub spin: Option<String>,
    pub series: Option<String>,
    pub package: Option<String>,
    pub version: Option<String>,
    pub variant: String,
    /// Unique, in the order the tracker reported them.
    pub tags: Vec<String>,
    pub tasks: BTreeMap<String, Task>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Bug {
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_workflow_namespace_only() {
        assert_eq!(
            normalize_task_name("kernel-sru-workflow/prepare-package"),
            "prepare-package"
        );
        assert_eq!(normalize_task_name("linux (Ubuntu)"), "linux (Ubuntu)");
        assert_eq!(
            normalize_task_name("kernel-sru-workflow"),
            "kernel-sru-workflow"
        );
    }

    #[test]
    fn status_parses_tracker_spellings() {
        assert_eq!("In Progress".parse::<TaskStatus>(), Ok(TaskStatus::InProgress));
        assert_eq!("fix-released".parse::<TaskStatus>(), Ok(TaskStatus::FixReleased));
        assert_eq!(
            "Incomplete (with response)".parse::<TaskStatus>(),
            Ok(TaskStatus::Incomplete)
        );
        assert_eq!("Won't Fix".parse::<TaskStatus>(), Ok(TaskStatus::WontFix));
        assert!("Does Not Exist".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn status_dates_ignore_statuses_without_a_slot() {
        let mut dates = StatusDates::default();
        assert!(dates.record(TaskStatus::InProgress, 42));
        assert!(!dates.record(TaskStatus::Invalid, 99));
        assert_eq!(dates.in_progress, 42);
        assert_eq!(dates.triaged, 0);
        assert_eq!(dates.entered(TaskStatus::Invalid), 0);
    }
}
