use crate::decode::{
    decode_title, find_cycle, problem_type, series_from_tags, swm_properties, TitleParts,
    SERIES_ORDER,
};
use crate::remote::{RemoteBug, RemoteMessage, RemoteTask};
use crate::timebase::timestamp;
use crate::timeline::{reconstruct, Timeline};
use crate::{normalize_task_name, Bug, Comment, StatusDates, Task, TaskStatus, DEFAULT_VARIANT};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("schema drift on bug {bug_id}: tracker tasks {existing:?} and {incoming:?} both map to task {task:?}")]
    SchemaDrift {
        bug_id: String,
        task: String,
        existing: String,
        incoming: String,
    },
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Tags accepted as the bug's series when the title carries none.
    pub series_codenames: Vec<String>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            series_codenames: SERIES_ORDER.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ReconcileOptions {
    pub fn with_extra_series<I>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        for codename in extra {
            let codename = codename.trim().to_string();
            if !codename.is_empty() && !self.series_codenames.contains(&codename) {
                self.series_codenames.push(codename);
            }
        }
        self
    }
}

/// Builds the canonical bug record from what the tracker reported. Pure: the
/// result is only persisted by the cache writer. Fails only when two tracker
/// tasks normalize to the same task name.
pub fn reconcile(remote: &RemoteBug, options: &ReconcileOptions) -> Result<Bug, ReconcileError> {
    let tags = unique_tags(&remote.tags);

    let (cycle, spin) = match find_cycle(&tags) {
        Some((cycle, spin)) => (Some(cycle), Some(spin)),
        None => (None, None),
    };

    let properties = swm_properties(&remote.description).unwrap_or_default();

    let title = decode_title(&remote.title).unwrap_or_else(|| {
        warn!(event = "title_invalid", bug_id = %remote.id, title = %remote.title);
        TitleParts::default()
    });
    let series = title
        .series
        .or_else(|| series_from_tags(&tags, &options.series_codenames));

    let mut tasks = current_tasks(remote)?;
    apply_timeline(&remote.id, &mut tasks, &reconstruct(&remote.activity));

    Ok(Bug {
        id: remote.id.clone(),
        title: remote.title.clone(),
        owner: remote.owner.name.clone(),
        owner_display_name: remote.owner.display_name.clone(),
        created: timestamp(remote.date_created),
        last_message: timestamp(remote.date_last_message),
        last_updated: timestamp(remote.date_last_updated),
        private: remote.private,
        security: remote.security_related,
        is_expirable: remote.is_expirable,
        duplicate: remote.duplicate_of.clone(),
        heat: remote.heat,
        description: remote.description.clone(),
        problem_type: problem_type(&remote.description),
        master_bug_id: properties.master_bug_id,
        cycle,
        spin,
        series,
        package: title.package,
        version: title.version,
        variant: properties
            .variant
            .unwrap_or_else(|| DEFAULT_VARIANT.to_string()),
        tags,
        tasks,
        comments: remote.messages.iter().map(comment).collect(),
    })
}

fn unique_tags(tags: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    tags.iter()
        .filter(|tag| seen.insert(tag.as_str()))
        .cloned()
        .collect()
}

fn current_tasks(remote: &RemoteBug) -> Result<BTreeMap<String, Task>, ReconcileError> {
    let mut tasks = BTreeMap::new();
    let mut targets: BTreeMap<String, &str> = BTreeMap::new();
    for remote_task in &remote.tasks {
        let task = task_from_remote(remote_task);
        match targets.get(&task.name) {
            Some(existing) if *existing != remote_task.bug_target_name => {
                return Err(ReconcileError::SchemaDrift {
                    bug_id: remote.id.clone(),
                    task: task.name,
                    existing: existing.to_string(),
                    incoming: remote_task.bug_target_name.clone(),
                });
            }
            Some(_) => {
                debug!(event = "task_name_repeated", bug_id = %remote.id, task = %task.name);
            }
            None => {}
        }
        targets.insert(task.name.clone(), &remote_task.bug_target_name);
        tasks.insert(task.name.clone(), task);
    }
    Ok(tasks)
}

fn task_from_remote(remote: &RemoteTask) -> Task {
    Task {
        name: normalize_task_name(&remote.bug_target_name).to_string(),
        status: remote.status.clone(),
        importance: remote.importance.clone(),
        assignee: remote.assignee.clone().unwrap_or_default(),
        owner: remote.owner.name.clone(),
        title: remote.title.clone(),
        milestone: remote.milestone.clone().unwrap_or_default(),
        is_complete: remote.is_complete,
        date_created: timestamp(remote.date_created),
        date_assigned: timestamp(remote.date_assigned),
        dates: StatusDates {
            incomplete: timestamp(remote.date_incomplete),
            confirmed: timestamp(remote.date_confirmed),
            triaged: timestamp(remote.date_triaged),
            in_progress: timestamp(remote.date_in_progress),
            fix_committed: timestamp(remote.date_fix_committed),
            fix_released: timestamp(remote.date_fix_released),
            closed: timestamp(remote.date_closed),
            left_new: timestamp(remote.date_left_new),
            left_closed: timestamp(remote.date_left_closed),
            ..StatusDates::default()
        },
    }
}

/// History for a task the bug no longer carries is dropped: workflows lose
/// tasks over their lifetime and such tasks are not synthesized.
fn apply_timeline(bug_id: &str, tasks: &mut BTreeMap<String, Task>, timeline: &Timeline) {
    for (task_name, statuses) in timeline {
        let Some(task) = tasks.get_mut(task_name) else {
            debug!(event = "history_task_dropped", bug_id = %bug_id, task = %task_name);
            continue;
        };

        for (status, ts) in statuses {
            match status.parse::<TaskStatus>() {
                Ok(status) => {
                    task.dates.record(status, *ts);
                }
                Err(_) => {
                    debug!(
                        event = "history_status_dropped",
                        bug_id = %bug_id,
                        task = %task_name,
                        status = %status
                    );
                }
            }
        }
    }
}

fn comment(message: &RemoteMessage) -> Comment {
    Comment {
        subject: message.subject.clone(),
        content: message.content.clone(),
        owner: message.owner.name.clone(),
        created: timestamp(message.date_created),
    }
}
