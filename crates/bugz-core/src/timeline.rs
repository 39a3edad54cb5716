use crate::remote::ActivityEntry;
use crate::timebase::timestamp;
use crate::WORKFLOW_PREFIX;
use std::collections::BTreeMap;

/// task name -> status name -> timestamp of the last time the task entered it.
pub type Timeline = BTreeMap<String, BTreeMap<String, i64>>;

/// Replays an activity log in order. A status re-entered later overwrites the
/// earlier timestamp for the same (task, status) pair.
pub fn reconstruct(activity: &[ActivityEntry]) -> Timeline {
    let mut timeline = Timeline::new();

    for entry in activity {
        let Some(task) = status_field_task(&entry.what_changed) else {
            continue;
        };
        let Some(status) = entry
            .new_value
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            continue;
        };

        timeline
            .entry(task.to_string())
            .or_default()
            .insert(status.to_string(), timestamp(Some(entry.date_changed)));
    }

    timeline
}

fn status_field_task(what_changed: &str) -> Option<&str> {
    if !what_changed.ends_with("status") {
        return None;
    }

    let (task, _) = what_changed.split_once(':')?;
    let task = task.trim();
    let task = if task.starts_with(WORKFLOW_PREFIX) && task.contains('/') {
        task.split('/').nth(1)?
    } else {
        task
    };

    (!task.is_empty()).then_some(task)
}
