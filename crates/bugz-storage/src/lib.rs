use bugz_core::decode::SERIES_ORDER;
use bugz_core::{Bug, Comment, CycleStat, StatusDates, Task};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

pub mod registry;

pub use registry::{task_table_for, SchemaRegistry, TaskTable, CACHE_TABLES};

pub const BUGZ_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("invalid task name {name:?}: {reason}")]
    InvalidTaskName { name: String, reason: String },
    #[error("schema drift on table {table}: holds task {existing:?}, refusing {incoming:?}")]
    SchemaDrift {
        table: String,
        existing: String,
        incoming: String,
    },
    #[error("task {task:?} maps onto reserved table {table}")]
    ReservedTable { table: String, task: String },
}

/// What a single [`BugzStore::persist_bug`] wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistReport {
    pub tags_written: usize,
    pub tasks_written: usize,
    pub comments_written: usize,
    pub stale_tables_cleared: usize,
}

pub struct BugzStore {
    conn: Connection,
    registry: SchemaRegistry,
}

impl BugzStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn,
            registry: SchemaRegistry::new(),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn,
            registry: SchemaRegistry::new(),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > BUGZ_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: BUGZ_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_bugz_schema.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
            info!(event = "cache_migrated", version = 1);
        }

        Ok(())
    }

    pub fn table_exists(&self, table: &str) -> Result<bool, StorageError> {
        table_exists(&self.conn, table)
    }

    /// Writes the whole cached view of one bug in a single transaction.
    ///
    /// Rows the bug no longer has (tags, comments, tasks in tables it used to
    /// index) are removed first, so persisting the same bug twice leaves the
    /// cache unchanged. Any error rolls everything back, including table
    /// claims made along the way.
    pub fn persist_bug(&mut self, bug: &Bug) -> Result<PersistReport, StorageError> {
        let tx = self.conn.transaction()?;
        let outcome = write_bug(&tx, &mut self.registry, bug).and_then(|report| {
            tx.commit()?;
            Ok(report)
        });

        match outcome {
            Ok(report) => {
                self.registry.settle();
                debug!(
                    event = "bug_persisted",
                    bug_id = %bug.id,
                    tags = report.tags_written,
                    tasks = report.tasks_written,
                    comments = report.comments_written
                );
                Ok(report)
            }
            Err(err) => {
                self.registry.discard();
                Err(err)
            }
        }
    }

    pub fn upsert_cycle_stat(&self, stat: &CycleStat) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT OR REPLACE INTO sru_cycle_stats (
                id,
                series,
                package,
                cycle,
                variant,
                total,
                ready,
                waiting,
                crank,
                build,
                review_start,
                review,
                regression_testing,
                verification_testing,
                certification_testing
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ",
            params![
                stat.id,
                stat.series,
                stat.package,
                stat.cycle,
                stat.variant,
                stat.total,
                stat.ready,
                stat.waiting,
                stat.crank,
                stat.build,
                stat.review_start,
                stat.review,
                stat.regression_testing,
                stat.verification_testing,
                stat.certification_testing,
            ],
        )?;
        Ok(())
    }

    /// Reassembles a bug from the cache. Returns `None` for unknown ids.
    pub fn load_bug(&self, bug_id: &str) -> Result<Option<Bug>, StorageError> {
        let bug = self
            .conn
            .query_row(
                "
                SELECT
                    id,
                    title,
                    owner,
                    owner_display_name,
                    created,
                    last_message,
                    last_updated,
                    private,
                    security,
                    duplicate,
                    heat,
                    is_expirable,
                    problem_type,
                    description,
                    master_bug_id,
                    cycle,
                    spin,
                    series,
                    package,
                    version,
                    variant
                FROM bugs
                WHERE id = ?1
                ",
                params![bug_id],
                |row| {
                    Ok(Bug {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        owner: row.get(2)?,
                        owner_display_name: row.get(3)?,
                        created: row.get(4)?,
                        last_message: row.get(5)?,
                        last_updated: row.get(6)?,
                        private: row.get::<_, i64>(7)? != 0,
                        security: row.get::<_, i64>(8)? != 0,
                        duplicate: row.get(9)?,
                        heat: row.get(10)?,
                        is_expirable: row.get::<_, i64>(11)? != 0,
                        problem_type: row.get(12)?,
                        description: row.get(13)?,
                        master_bug_id: row.get(14)?,
                        cycle: row.get(15)?,
                        spin: row.get(16)?,
                        series: row.get(17)?,
                        package: row.get(18)?,
                        version: row.get(19)?,
                        variant: row.get(20)?,
                        ..Bug::default()
                    })
                },
            )
            .optional()?;

        let Some(mut bug) = bug else {
            return Ok(None);
        };
        bug.tags = self.tags_for_bug(bug_id)?;
        bug.tasks = self.tasks_for_bug(bug_id)?;
        bug.comments = self.comments_for_bug(bug_id)?;
        Ok(Some(bug))
    }

    pub fn tags_for_bug(&self, bug_id: &str) -> Result<Vec<String>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT tag FROM tags WHERE id = ?1 ORDER BY rid")?;
        let rows = stmt.query_map(params![bug_id], |row| row.get(0))?;
        let mut tags = Vec::new();
        for row in rows {
            tags.push(row?);
        }
        Ok(tags)
    }

    /// Tables the `tasks` index says hold rows for this bug.
    pub fn task_tables_for_bug(&self, bug_id: &str) -> Result<Vec<TaskTable>, StorageError> {
        task_tables_for_bug(&self.conn, bug_id)
    }

    pub fn tasks_for_bug(&self, bug_id: &str) -> Result<BTreeMap<String, Task>, StorageError> {
        let mut tasks = BTreeMap::new();
        for table in self.task_tables_for_bug(bug_id)? {
            if !self.table_exists(table.as_str())? {
                continue;
            }
            let mut stmt = self.conn.prepare(&format!(
                "
                SELECT
                    name,
                    status,
                    importance,
                    assignee,
                    owner,
                    title,
                    milestone,
                    is_complete,
                    date_created,
                    date_assigned,
                    date_new,
                    date_incomplete,
                    date_opinion,
                    date_confirmed,
                    date_triaged,
                    date_in_progress,
                    date_fix_committed,
                    date_fix_released,
                    date_closed,
                    date_left_new,
                    date_left_closed
                FROM {}
                WHERE id = ?1
                ORDER BY rid
                ",
                table.quoted()
            ))?;
            let rows = stmt.query_map(params![bug_id], task_from_row)?;
            for row in rows {
                let task = row?;
                tasks.insert(task.name.clone(), task);
            }
        }
        Ok(tasks)
    }

    pub fn comments_for_bug(&self, bug_id: &str) -> Result<Vec<Comment>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT subject, content, owner, created
            FROM comments
            WHERE id = ?1
            ORDER BY rid
            ",
        )?;
        let rows = stmt.query_map(params![bug_id], |row| {
            Ok(Comment {
                subject: row.get(0)?,
                content: row.get(1)?,
                owner: row.get(2)?,
                created: row.get(3)?,
            })
        })?;
        let mut comments = Vec::new();
        for row in rows {
            comments.push(row?);
        }
        Ok(comments)
    }

    /// Task names ever stored in `table`.
    pub fn task_names_for_table(&self, table: &str) -> Result<Vec<String>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM task_names WHERE tbl = ?1 ORDER BY name")?;
        let rows = stmt.query_map(params![table], |row| row.get(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    /// Cycles seen on cached bugs, oldest first. Development cycles (`d...`)
    /// are not stable cycles.
    pub fn stable_cycles(&self) -> Result<Vec<String>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT DISTINCT cycle
            FROM bugs
            WHERE cycle IS NOT NULL AND cycle <> '' AND cycle <> 'None'
            ORDER BY cycle
            ",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut cycles = Vec::new();
        for row in rows {
            let cycle = row?;
            if !cycle.starts_with('d') {
                cycles.push(cycle);
            }
        }
        Ok(cycles)
    }

    pub fn cycle_bug_ids(&self, cycle: &str) -> Result<Vec<String>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM bugs WHERE cycle = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![cycle], |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Cached bugs of `cycle`, grouped by series.
    pub fn bugs_in_cycle(&self, cycle: &str) -> Result<Vec<Bug>, StorageError> {
        self.load_bugs(
            "SELECT id FROM bugs WHERE cycle = ?1 ORDER BY series, id",
            params![cycle],
        )
    }

    pub fn bugs_in_cycle_and_series(
        &self,
        cycle: &str,
        series: &str,
        variant: &str,
    ) -> Result<Vec<Bug>, StorageError> {
        self.load_bugs(
            "
            SELECT id
            FROM bugs
            WHERE cycle = ?1 AND series = ?2 AND variant = ?3
            ORDER BY package, id
            ",
            params![cycle, series, variant],
        )
    }

    fn load_bugs(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<Bug>, StorageError> {
        let ids = {
            let mut stmt = self.conn.prepare(sql)?;
            let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            ids
        };

        let mut bugs = Vec::new();
        for id in ids {
            if let Some(bug) = self.load_bug(&id)? {
                bugs.push(bug);
            }
        }
        Ok(bugs)
    }

    /// Series with stats in `cycle`, newest series first. Codenames missing
    /// from the known list sort after it, alphabetically.
    pub fn series_in_cycle(&self, cycle: &str) -> Result<Vec<String>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT DISTINCT series
            FROM sru_cycle_stats
            WHERE cycle = ?1 AND series IS NOT NULL
            ",
        )?;
        let rows = stmt.query_map(params![cycle], |row| row.get::<_, String>(0))?;
        let mut series = Vec::new();
        for row in rows {
            series.push(row?);
        }
        series.sort_by_key(|name| {
            let rank = SERIES_ORDER
                .iter()
                .position(|known| *known == name.as_str())
                .unwrap_or(SERIES_ORDER.len());
            (rank, name.clone())
        });
        Ok(series)
    }

    pub fn stats_in_cycle_and_series(
        &self,
        cycle: &str,
        series: &str,
        variant: &str,
    ) -> Result<Vec<CycleStat>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT
                id,
                series,
                package,
                cycle,
                variant,
                total,
                ready,
                waiting,
                crank,
                build,
                review_start,
                review,
                regression_testing,
                verification_testing,
                certification_testing
            FROM sru_cycle_stats
            WHERE cycle = ?1 AND series = ?2 AND variant = ?3
            ORDER BY package, id
            ",
        )?;
        let rows = stmt.query_map(params![cycle, series, variant], cycle_stat_from_row)?;
        let mut stats = Vec::new();
        for row in rows {
            stats.push(row?);
        }
        Ok(stats)
    }

    pub fn cycle_stat(&self, bug_id: &str) -> Result<Option<CycleStat>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "
                SELECT
                    id,
                    series,
                    package,
                    cycle,
                    variant,
                    total,
                    ready,
                    waiting,
                    crank,
                    build,
                    review_start,
                    review,
                    regression_testing,
                    verification_testing,
                    certification_testing
                FROM sru_cycle_stats
                WHERE id = ?1
                ",
                params![bug_id],
                cycle_stat_from_row,
            )
            .optional()?)
    }
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, StorageError> {
    let exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(exists > 0)
}

fn task_tables_for_bug(conn: &Connection, bug_id: &str) -> Result<Vec<TaskTable>, StorageError> {
    let mut stmt = conn.prepare("SELECT DISTINCT tbl FROM tasks WHERE id = ?1 ORDER BY tbl")?;
    let rows = stmt.query_map(params![bug_id], |row| row.get::<_, String>(0))?;
    let mut tables = Vec::new();
    for row in rows {
        tables.push(TaskTable::from_stored(&row?)?);
    }
    Ok(tables)
}

fn write_bug(
    conn: &Connection,
    registry: &mut SchemaRegistry,
    bug: &Bug,
) -> Result<PersistReport, StorageError> {
    let mut report = PersistReport::default();

    conn.execute(
        "
        INSERT OR REPLACE INTO bugs (
            id,
            title,
            owner,
            owner_display_name,
            created,
            last_message,
            last_updated,
            private,
            security,
            duplicate,
            heat,
            is_expirable,
            problem_type,
            description,
            master_bug_id,
            cycle,
            spin,
            series,
            package,
            version,
            variant
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
            ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21
        )
        ",
        params![
            bug.id,
            bug.title,
            bug.owner,
            bug.owner_display_name,
            bug.created,
            bug.last_message,
            bug.last_updated,
            i64::from(bug.private),
            i64::from(bug.security),
            bug.duplicate,
            bug.heat,
            i64::from(bug.is_expirable),
            bug.problem_type,
            bug.description,
            bug.master_bug_id,
            bug.cycle,
            bug.spin,
            bug.series,
            bug.package,
            bug.version,
            bug.variant,
        ],
    )?;

    conn.execute("DELETE FROM tags WHERE id = ?1", params![bug.id])?;
    for tag in &bug.tags {
        conn.execute(
            "INSERT INTO tags (id, tag) VALUES (?1, ?2)",
            params![bug.id, tag],
        )?;
        report.tags_written += 1;
    }

    for table in task_tables_for_bug(conn, &bug.id)? {
        if table_exists(conn, table.as_str())? {
            conn.execute(
                &format!("DELETE FROM {} WHERE id = ?1", table.quoted()),
                params![bug.id],
            )?;
            report.stale_tables_cleared += 1;
        }
    }
    conn.execute("DELETE FROM tasks WHERE id = ?1", params![bug.id])?;

    for task in bug.tasks.values() {
        let table = registry.resolve(conn, &task.name)?;
        conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", table.quoted()),
            params![bug.id],
        )?;
        insert_task_row(conn, &table, &bug.id, task)?;
        conn.execute(
            "INSERT INTO tasks (id, tbl) VALUES (?1, ?2)",
            params![bug.id, table.as_str()],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO task_names (tbl, name) VALUES (?1, ?2)",
            params![table.as_str(), task.name],
        )?;
        report.tasks_written += 1;
    }

    conn.execute("DELETE FROM comments WHERE id = ?1", params![bug.id])?;
    for comment in &bug.comments {
        conn.execute(
            "
            INSERT INTO comments (id, subject, content, owner, created)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                bug.id,
                comment.subject,
                comment.content,
                comment.owner,
                comment.created
            ],
        )?;
        report.comments_written += 1;
    }

    Ok(report)
}

fn insert_task_row(
    conn: &Connection,
    table: &TaskTable,
    bug_id: &str,
    task: &Task,
) -> Result<(), StorageError> {
    let dates = &task.dates;
    conn.execute(
        &format!(
            "
            INSERT INTO {} (
                id,
                name,
                status,
                importance,
                assignee,
                owner,
                title,
                milestone,
                is_complete,
                date_created,
                date_assigned,
                date_new,
                date_incomplete,
                date_opinion,
                date_confirmed,
                date_triaged,
                date_in_progress,
                date_fix_committed,
                date_fix_released,
                date_closed,
                date_left_new,
                date_left_closed
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22
            )
            ",
            table.quoted()
        ),
        params![
            bug_id,
            task.name,
            task.status,
            task.importance,
            task.assignee,
            task.owner,
            task.title,
            task.milestone,
            i64::from(task.is_complete),
            task.date_created,
            task.date_assigned,
            dates.new,
            dates.incomplete,
            dates.opinion,
            dates.confirmed,
            dates.triaged,
            dates.in_progress,
            dates.fix_committed,
            dates.fix_released,
            dates.closed,
            dates.left_new,
            dates.left_closed,
        ],
    )?;
    Ok(())
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        name: row.get(0)?,
        status: row.get(1)?,
        importance: row.get(2)?,
        assignee: row.get(3)?,
        owner: row.get(4)?,
        title: row.get(5)?,
        milestone: row.get(6)?,
        is_complete: row.get::<_, i64>(7)? != 0,
        date_created: row.get(8)?,
        date_assigned: row.get(9)?,
        dates: StatusDates {
            new: row.get(10)?,
            incomplete: row.get(11)?,
            opinion: row.get(12)?,
            confirmed: row.get(13)?,
            triaged: row.get(14)?,
            in_progress: row.get(15)?,
            fix_committed: row.get(16)?,
            fix_released: row.get(17)?,
            closed: row.get(18)?,
            left_new: row.get(19)?,
            left_closed: row.get(20)?,
        },
    })
}

fn cycle_stat_from_row(row: &Row<'_>) -> rusqlite::Result<CycleStat> {
    Ok(CycleStat {
        id: row.get(0)?,
        series: row.get(1)?,
        package: row.get(2)?,
        cycle: row.get(3)?,
        variant: row.get(4)?,
        total: row.get(5)?,
        ready: row.get(6)?,
        waiting: row.get(7)?,
        crank: row.get(8)?,
        build: row.get(9)?,
        review_start: row.get(10)?,
        review: row.get(11)?,
        regression_testing: row.get(12)?,
        verification_testing: row.get(13)?,
        certification_testing: row.get(14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bugz_core::TaskStatus;
    use rusqlite::types::Value;

    fn task(name: &str, status: &str, created: i64) -> Task {
        let mut task = Task {
            name: name.to_string(),
            status: status.to_string(),
            importance: "Medium".to_string(),
            owner: "ubuntu-kernel-bot".to_string(),
            title: format!("{name} task"),
            date_created: created,
            ..Task::default()
        };
        task.dates.record(TaskStatus::Confirmed, created + 10);
        task
    }

    fn sample_bug(id: &str, cycle: &str, task_names: &[&str]) -> Bug {
        Bug {
            id: id.to_string(),
            title: "jammy/linux: 5.15.0-105.115 -proposed tracker".to_string(),
            owner: "ubuntu-kernel-bot".to_string(),
            owner_display_name: "Ubuntu Kernel Bot".to_string(),
            created: 100,
            heat: 6,
            private: true,
            description: "-- swm properties --\nvariant: debs\n".to_string(),
            problem_type: "unknown".to_string(),
            cycle: Some(cycle.to_string()),
            spin: Some("2".to_string()),
            series: Some("jammy".to_string()),
            package: Some("linux".to_string()),
            version: Some("5.15.0-105.115".to_string()),
            variant: "debs".to_string(),
            tags: vec![
                "kernel-release-tracking-bug".to_string(),
                format!("kernel-sru-cycle-{cycle}-2"),
                "jammy".to_string(),
            ],
            tasks: task_names
                .iter()
                .map(|name| (name.to_string(), task(name, "Confirmed", 100)))
                .collect(),
            comments: vec![Comment {
                subject: "Re: tracker".to_string(),
                content: "promoted".to_string(),
                owner: "ubuntu-kernel-bot".to_string(),
                created: 140,
            }],
            ..Bug::default()
        }
    }

    fn count(store: &BugzStore, sql: &str) -> i64 {
        store
            .conn
            .query_row(sql, [], |row| row.get(0))
            .expect("count query")
    }

    #[test]
    fn migration_creates_cache_tables() {
        let store = BugzStore::open_in_memory().expect("open db");
        assert_eq!(store.schema_version().expect("version"), BUGZ_SCHEMA_VERSION);

        for table in CACHE_TABLES {
            assert!(store.table_exists(table).expect("table check"), "{table}");
        }
    }

    #[test]
    fn newer_schema_is_refused() {
        let file = tempfile::NamedTempFile::new().expect("temp db");
        {
            let conn = Connection::open(file.path()).expect("open raw");
            conn.execute("PRAGMA user_version = 9", [])
                .expect("bump version");
        }
        let err = BugzStore::open(file.path())
            .err()
            .expect("newer schema rejected");
        assert!(matches!(
            err,
            StorageError::UnsupportedSchemaVersion { found: 9, .. }
        ));
    }

    #[test]
    fn persist_and_load_round_trip() {
        let mut store = BugzStore::open_in_memory().expect("open db");
        let bug = sample_bug(
            "2060010",
            "2024.03.25",
            &["prepare-package", "linux (Ubuntu Jammy)"],
        );

        let report = store.persist_bug(&bug).expect("persist");
        assert_eq!(report.tags_written, 3);
        assert_eq!(report.tasks_written, 2);
        assert_eq!(report.comments_written, 1);

        let loaded = store
            .load_bug("2060010")
            .expect("load")
            .expect("bug cached");
        assert_eq!(loaded, bug);
        assert!(store.load_bug("1").expect("load").is_none());
        assert_eq!(
            store
                .task_names_for_table("linux_Ubuntu_Jammy")
                .expect("task names"),
            vec!["linux (Ubuntu Jammy)".to_string()]
        );
    }

    fn table_rows(store: &BugzStore, sql: &str) -> Vec<Vec<Value>> {
        let mut stmt = store.conn.prepare(sql).expect("prepare snapshot");
        let columns = stmt.column_count();
        let rows = stmt
            .query_map([], |row| {
                (0..columns)
                    .map(|index| row.get::<_, Value>(index))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })
            .expect("query snapshot");
        let mut collected = Vec::new();
        for row in rows {
            collected.push(row.expect("snapshot row"));
        }
        collected
    }

    // Everything but the autoincrement row ids.
    fn cache_snapshot(store: &BugzStore) -> Vec<Vec<Vec<Value>>> {
        [
            "SELECT * FROM bugs ORDER BY id",
            "SELECT id, tag FROM tags ORDER BY rid",
            "SELECT id, tbl FROM tasks ORDER BY id, tbl",
            "SELECT tbl, name FROM task_names ORDER BY tbl, name",
            "SELECT id, subject, content, owner, created FROM comments ORDER BY rid",
            "SELECT * FROM sru_cycle_stats ORDER BY id",
            "
            SELECT
                id, name, status, importance, assignee, owner, title, milestone,
                is_complete, date_created, date_assigned, date_new, date_incomplete,
                date_opinion, date_confirmed, date_triaged, date_in_progress,
                date_fix_committed, date_fix_released, date_closed, date_left_new,
                date_left_closed
            FROM prepare_package
            ORDER BY rid
            ",
        ]
        .iter()
        .map(|sql| table_rows(store, sql))
        .collect()
    }

    #[test]
    fn persisting_twice_leaves_the_cache_unchanged() {
        let mut store = BugzStore::open_in_memory().expect("open db");
        let bug = sample_bug("2060010", "2024.03.25", &["prepare-package"]);

        store.persist_bug(&bug).expect("first persist");
        let before = cache_snapshot(&store);
        let report = store.persist_bug(&bug).expect("second persist");
        let after = cache_snapshot(&store);

        assert_eq!(report.stale_tables_cleared, 1);
        assert_eq!(before, after);
        assert_eq!(before[1].len(), 3);
        assert_eq!(before[6].len(), 1);
        assert_eq!(count(&store, "SELECT COUNT(*) FROM prepare_package"), 1);
    }

    #[test]
    fn dropped_tasks_are_cleared_from_their_tables() {
        let mut store = BugzStore::open_in_memory().expect("open db");
        let before = sample_bug(
            "2060010",
            "2024.03.25",
            &["prepare-package", "boot-testing"],
        );
        store.persist_bug(&before).expect("persist before");

        let after = sample_bug("2060010", "2024.03.25", &["prepare-package"]);
        store.persist_bug(&after).expect("persist after");

        assert_eq!(count(&store, "SELECT COUNT(*) FROM boot_testing"), 0);
        assert_eq!(
            store.task_tables_for_bug("2060010").expect("tables"),
            vec![TaskTable::from_stored("prepare_package").expect("ident")]
        );
        let loaded = store.load_bug("2060010").expect("load").expect("cached");
        assert_eq!(loaded.tasks.len(), 1);
    }

    #[test]
    fn colliding_task_names_roll_back_the_whole_bug() {
        let mut store = BugzStore::open_in_memory().expect("open db");
        store
            .persist_bug(&sample_bug("1", "2024.03.25", &["foo-bar"]))
            .expect("first owner of foo_bar");

        let err = store
            .persist_bug(&sample_bug("2", "2024.03.25", &["bar", "foo.bar"]))
            .expect_err("schema drift");
        assert!(matches!(err, StorageError::SchemaDrift { .. }));

        assert!(store.load_bug("2").expect("load").is_none());
        assert_eq!(count(&store, "SELECT COUNT(*) FROM tags WHERE id = '2'"), 0);
        assert_eq!(count(&store, "SELECT COUNT(*) FROM tasks WHERE id = '2'"), 0);
        // table creation rolled back along with the rows
        assert!(!store.table_exists("bar").expect("table check"));
        assert!(!store.registry.claimed("bar"));

        store
            .persist_bug(&sample_bug("2", "2024.03.25", &["bar"]))
            .expect("retry without the colliding task");
        assert!(store.registry.claimed("bar"));
    }

    #[test]
    fn drift_is_detected_across_store_instances() {
        let file = tempfile::NamedTempFile::new().expect("temp db");
        {
            let mut store = BugzStore::open(file.path()).expect("open db");
            store
                .persist_bug(&sample_bug("1", "2024.03.25", &["foo-bar"]))
                .expect("persist");
        }

        let mut store = BugzStore::open(file.path()).expect("reopen db");
        let err = store
            .persist_bug(&sample_bug("2", "2024.03.25", &["Foo.Bar"]))
            .expect_err("collision with a stored claim");
        assert!(matches!(err, StorageError::SchemaDrift { .. }));
        store
            .persist_bug(&sample_bug("3", "2024.03.25", &["foo-bar"]))
            .expect("same task name is fine");
    }

    #[test]
    fn reserved_task_name_is_refused() {
        let mut store = BugzStore::open_in_memory().expect("open db");
        let err = store
            .persist_bug(&sample_bug("1", "2024.03.25", &["tags"]))
            .expect_err("reserved");
        assert!(matches!(err, StorageError::ReservedTable { .. }));
        assert!(store.load_bug("1").expect("load").is_none());
    }

    #[test]
    fn cycle_readers() {
        let mut store = BugzStore::open_in_memory().expect("open db");
        for (id, cycle) in [
            ("3", "2024.04.29"),
            ("1", "2024.03.25"),
            ("2", "2024.03.25"),
            ("4", "d2024.05.06"),
        ] {
            store
                .persist_bug(&sample_bug(id, cycle, &["prepare-package"]))
                .expect("persist");
        }

        assert_eq!(
            store.stable_cycles().expect("cycles"),
            vec!["2024.03.25".to_string(), "2024.04.29".to_string()]
        );
        assert_eq!(
            store.cycle_bug_ids("2024.03.25").expect("ids"),
            vec!["1".to_string(), "2".to_string()]
        );

        let mut snap = sample_bug("5", "2024.03.25", &["prepare-package"]);
        snap.variant = "snap".to_string();
        store.persist_bug(&snap).expect("persist snap");
        let mut focal = sample_bug("6", "2024.03.25", &["prepare-package"]);
        focal.series = Some("focal".to_string());
        store.persist_bug(&focal).expect("persist focal");

        let jammy_debs = store
            .bugs_in_cycle_and_series("2024.03.25", "jammy", "debs")
            .expect("bugs");
        assert_eq!(
            jammy_debs.iter().map(|bug| bug.id.as_str()).collect::<Vec<_>>(),
            vec!["1", "2"]
        );
        assert_eq!(jammy_debs[0].tasks.len(), 1);
        assert_eq!(
            store
                .bugs_in_cycle_and_series("2024.03.25", "jammy", "snap")
                .expect("bugs")
                .len(),
            1
        );
        assert_eq!(
            store
                .bugs_in_cycle("2024.03.25")
                .expect("bugs")
                .iter()
                .map(|bug| bug.id.as_str())
                .collect::<Vec<_>>(),
            vec!["6", "1", "2", "5"]
        );
    }

    #[test]
    fn stats_readers_filter_by_cycle_series_and_variant() {
        let store = BugzStore::open_in_memory().expect("open db");
        let stat = |id: &str, series: &str, package: &str, variant: &str| CycleStat {
            id: id.to_string(),
            series: Some(series.to_string()),
            package: Some(package.to_string()),
            cycle: Some("2024.03.25".to_string()),
            variant: variant.to_string(),
            total: 10,
            ..CycleStat::default()
        };
        for s in [
            stat("1", "focal", "linux", "debs"),
            stat("2", "noble", "linux-oem", "debs"),
            stat("3", "noble", "linux", "debs"),
            stat("4", "noble", "linux", "snap"),
            stat("5", "custom", "linux", "debs"),
        ] {
            store.upsert_cycle_stat(&s).expect("upsert");
        }

        assert_eq!(
            store.series_in_cycle("2024.03.25").expect("series"),
            vec![
                "noble".to_string(),
                "focal".to_string(),
                "custom".to_string()
            ]
        );
        let noble = store
            .stats_in_cycle_and_series("2024.03.25", "noble", "debs")
            .expect("stats");
        assert_eq!(
            noble.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            vec!["3", "2"]
        );

        let mut updated = stat("3", "noble", "linux", "debs");
        updated.total = 99;
        store.upsert_cycle_stat(&updated).expect("overwrite");
        assert_eq!(
            store.cycle_stat("3").expect("stat").map(|s| s.total),
            Some(99)
        );
        assert_eq!(count(&store, "SELECT COUNT(*) FROM sru_cycle_stats"), 5);
    }
}
