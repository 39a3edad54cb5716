use bugz_core::{
    derive_cycle_stat, reconcile, BugSource, CycleStat, ReconcileError, ReconcileOptions,
    SourceError,
};
use bugz_storage::{BugzStore, PersistReport, StorageError};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

pub mod json_source;

pub use json_source::JsonDirSource;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error("reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub reconcile: ReconcileOptions,
    /// Derive and store cycle stats after each bug.
    pub derive_stats: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            reconcile: ReconcileOptions::default(),
            derive_stats: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedBug {
    pub bug_id: String,
    pub cycle: Option<String>,
    pub series: Option<String>,
    pub package: Option<String>,
    pub variant: String,
    pub persisted: PersistReport,
    pub stat: Option<CycleStat>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub bug_id: String,
    pub error: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub bugs_synced: usize,
    pub tags_written: usize,
    pub tasks_written: usize,
    pub comments_written: usize,
    pub stats_written: usize,
    pub failures: Vec<SyncFailure>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn absorb(&mut self, synced: &SyncedBug) {
        self.bugs_synced += 1;
        self.tags_written += synced.persisted.tags_written;
        self.tasks_written += synced.persisted.tasks_written;
        self.comments_written += synced.persisted.comments_written;
        if synced.stat.is_some() {
            self.stats_written += 1;
        }
    }
}

/// Drives fetch, reconcile, persist and derive for one bug at a time.
pub struct BugSyncer<S> {
    source: S,
    options: SyncOptions,
}

impl<S: BugSource> BugSyncer<S> {
    pub fn new(source: S, options: SyncOptions) -> Self {
        Self { source, options }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn sync_bug(&self, store: &mut BugzStore, bug_id: &str) -> Result<SyncedBug, SyncError> {
        let remote = self.source.fetch(bug_id)?;
        let bug = reconcile(&remote, &self.options.reconcile)?;
        let persisted = store.persist_bug(&bug)?;

        let stat = if self.options.derive_stats {
            let stat = derive_cycle_stat(&bug);
            store.upsert_cycle_stat(&stat)?;
            Some(stat)
        } else {
            None
        };

        info!(
            event = "bug_synced",
            bug_id = %bug.id,
            cycle = bug.cycle.as_deref().unwrap_or("-"),
            tasks = persisted.tasks_written,
            stats = stat.is_some()
        );

        Ok(SyncedBug {
            bug_id: bug.id,
            cycle: bug.cycle,
            series: bug.series,
            package: bug.package,
            variant: bug.variant,
            persisted,
            stat,
        })
    }

    /// Syncs bugs in order. A failing bug is logged and recorded; the rest of
    /// the run goes on.
    pub fn sync_bugs<I, T>(&self, store: &mut BugzStore, bug_ids: I) -> SyncReport
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut report = SyncReport {
            started_at: Some(Utc::now()),
            ..SyncReport::default()
        };

        for bug_id in bug_ids {
            let bug_id = bug_id.as_ref();
            match self.sync_bug(store, bug_id) {
                Ok(synced) => report.absorb(&synced),
                Err(err) => {
                    warn!(event = "bug_sync_failed", bug_id = %bug_id, error = %err);
                    report.failures.push(SyncFailure {
                        bug_id: bug_id.to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }

        report.finished_at = Some(Utc::now());
        info!(
            event = "sync_finished",
            synced = report.bugs_synced,
            failed = report.failures.len(),
            stats = report.stats_written
        );
        report
    }
}

/// Recomputes the cycle stats of every cached bug in `cycle` from cache data
/// alone and overwrites the stored ones.
pub fn rederive_cycle(store: &BugzStore, cycle: &str) -> Result<Vec<CycleStat>, SyncError> {
    let mut stats = Vec::new();
    for bug_id in store.cycle_bug_ids(cycle)? {
        let Some(bug) = store.load_bug(&bug_id)? else {
            continue;
        };
        let stat = derive_cycle_stat(&bug);
        store.upsert_cycle_stat(&stat)?;
        stats.push(stat);
    }
    info!(event = "cycle_rederived", cycle = %cycle, bugs = stats.len());
    Ok(stats)
}
