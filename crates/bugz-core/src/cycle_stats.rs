use crate::{Bug, TaskStatus};
use serde::{Deserialize, Serialize};

/// A point on a task's timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Created,
    Entered(TaskStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub name: &'static str,
    pub start: (&'static str, Mark),
    pub end: (&'static str, Mark),
}

const PREPARE: &str = "prepare-package";
const PROMOTE: &str = "promote-to-proposed";

pub const STAGES: [Stage; 9] = [
    Stage {
        name: "ready",
        start: (PREPARE, Mark::Created),
        end: (PREPARE, Mark::Entered(TaskStatus::Confirmed)),
    },
    Stage {
        name: "waiting",
        start: (PREPARE, Mark::Entered(TaskStatus::Confirmed)),
        end: (PREPARE, Mark::Entered(TaskStatus::InProgress)),
    },
    Stage {
        name: "crank",
        start: (PREPARE, Mark::Entered(TaskStatus::InProgress)),
        end: (PREPARE, Mark::Entered(TaskStatus::FixCommitted)),
    },
    Stage {
        name: "build",
        start: (PREPARE, Mark::Entered(TaskStatus::FixReleased)),
        end: (PROMOTE, Mark::Entered(TaskStatus::Confirmed)),
    },
    Stage {
        name: "review_start",
        start: (PROMOTE, Mark::Entered(TaskStatus::Confirmed)),
        end: (PROMOTE, Mark::Entered(TaskStatus::InProgress)),
    },
    Stage {
        name: "review",
        start: (PROMOTE, Mark::Entered(TaskStatus::InProgress)),
        end: (PROMOTE, Mark::Entered(TaskStatus::FixCommitted)),
    },
    Stage {
        name: "regression_testing",
        start: ("regression-testing", Mark::Entered(TaskStatus::Confirmed)),
        end: ("regression-testing", Mark::Entered(TaskStatus::FixReleased)),
    },
    Stage {
        name: "verification_testing",
        start: ("verification-testing", Mark::Entered(TaskStatus::Confirmed)),
        end: ("verification-testing", Mark::Entered(TaskStatus::FixReleased)),
    },
    Stage {
        name: "certification_testing",
        start: ("certification-testing", Mark::Entered(TaskStatus::Confirmed)),
        end: ("certification-testing", Mark::Entered(TaskStatus::FixReleased)),
    },
];

/// Per-bug stage durations in seconds. Derived data: safe to overwrite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleStat {
    pub id: String,
    pub series: Option<String>,
    pub package: Option<String>,
    pub cycle: Option<String>,
    pub variant: String,
    pub total: i64,
    pub ready: i64,
    pub waiting: i64,
    pub crank: i64,
    pub build: i64,
    pub review_start: i64,
    pub review: i64,
    pub regression_testing: i64,
    pub verification_testing: i64,
    pub certification_testing: i64,
}

impl CycleStat {
    pub fn stage(&self, name: &str) -> Option<i64> {
        let value = match name {
            "total" => self.total,
            "ready" => self.ready,
            "waiting" => self.waiting,
            "crank" => self.crank,
            "build" => self.build,
            "review_start" => self.review_start,
            "review" => self.review,
            "regression_testing" => self.regression_testing,
            "verification_testing" => self.verification_testing,
            "certification_testing" => self.certification_testing,
            _ => return None,
        };
        Some(value)
    }

    fn stage_mut(&mut self, name: &str) -> Option<&mut i64> {
        match name {
            "total" => Some(&mut self.total),
            "ready" => Some(&mut self.ready),
            "waiting" => Some(&mut self.waiting),
            "crank" => Some(&mut self.crank),
            "build" => Some(&mut self.build),
            "review_start" => Some(&mut self.review_start),
            "review" => Some(&mut self.review),
            "regression_testing" => Some(&mut self.regression_testing),
            "verification_testing" => Some(&mut self.verification_testing),
            "certification_testing" => Some(&mut self.certification_testing),
            _ => None,
        }
    }
}

fn mark_timestamp(bug: &Bug, (task, mark): (&str, Mark)) -> i64 {
    bug.task(task).map_or(0, |task| match mark {
        Mark::Created => task.date_created,
        Mark::Entered(status) => task.entered(status),
    })
}

/// End minus start, or 0 when either end is unknown.
pub fn stage_duration(bug: &Bug, stage: &Stage) -> i64 {
    let start = mark_timestamp(bug, stage.start);
    let end = mark_timestamp(bug, stage.end);
    if start == 0 || end == 0 {
        return 0;
    }
    end - start
}

/// First in-progress anywhere on the bug to the last fix-released.
pub fn total_duration(bug: &Bug) -> i64 {
    let first_in_progress = bug
        .tasks
        .values()
        .map(|task| task.entered(TaskStatus::InProgress))
        .filter(|ts| *ts != 0)
        .min();
    let last_fix_released = bug
        .tasks
        .values()
        .map(|task| task.entered(TaskStatus::FixReleased))
        .filter(|ts| *ts != 0)
        .max();

    match (first_in_progress, last_fix_released) {
        (Some(start), Some(end)) => end - start,
        _ => 0,
    }
}

pub fn derive_cycle_stat(bug: &Bug) -> CycleStat {
    let mut stat = CycleStat {
        id: bug.id.clone(),
        series: bug.series.clone(),
        package: bug.package.clone(),
        cycle: bug.cycle.clone(),
        variant: bug.variant.clone(),
        total: total_duration(bug),
        ..CycleStat::default()
    };

    for stage in &STAGES {
        if let Some(slot) = stat.stage_mut(stage.name) {
            *slot = stage_duration(bug, stage);
        }
    }

    stat
}
