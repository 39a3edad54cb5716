use crate::StorageError;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

pub const CACHE_TABLES: [&str; 6] = [
    "bugs",
    "tags",
    "tasks",
    "task_names",
    "comments",
    "sru_cycle_stats",
];

/// A validated per-task table identifier: ASCII letters, digits and `_` only.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskTable(String);

impl TaskTable {
    pub fn from_stored(ident: &str) -> Result<Self, StorageError> {
        if ident.is_empty() || !ident.chars().all(is_ident_char) {
            return Err(StorageError::InvalidTaskName {
                name: ident.to_string(),
                reason: "stored table identifier is not a plain identifier".to_string(),
            });
        }
        Ok(Self(ident.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }

    fn key(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl fmt::Display for TaskTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// `linux (Ubuntu Jammy)` -> `linux_Ubuntu_Jammy`, `a/b` -> `a___b`.
pub fn task_table_for(task_name: &str) -> Result<TaskTable, StorageError> {
    let mut ident = String::with_capacity(task_name.len());
    for ch in task_name.chars() {
        match ch {
            '-' | ' ' | '.' => ident.push('_'),
            '(' | ')' => {}
            '/' => ident.push_str("___"),
            ch if is_ident_char(ch) => ident.push(ch),
            other => {
                return Err(StorageError::InvalidTaskName {
                    name: task_name.to_string(),
                    reason: format!("unsupported character {other:?}"),
                })
            }
        }
    }

    if ident.is_empty() {
        return Err(StorageError::InvalidTaskName {
            name: task_name.to_string(),
            reason: "empty table identifier".to_string(),
        });
    }
    Ok(TaskTable(ident))
}

// `idx_` is the namespace of the cache's own indexes.
fn is_reserved(key: &str) -> bool {
    CACHE_TABLES.contains(&key) || key.starts_with("sqlite_") || key.starts_with("idx_")
}

/// task table -> owning task name. Claims stay pending until the
/// transaction that made them commits.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    claims: BTreeMap<String, String>,
    pending: BTreeMap<String, String>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&mut self, conn: &Connection, task_name: &str) -> Result<TaskTable, StorageError> {
        let table = task_table_for(task_name)?;
        let key = table.key();

        if is_reserved(&key) {
            return Err(StorageError::ReservedTable {
                table: table.to_string(),
                task: task_name.to_string(),
            });
        }

        if let Some(existing) = self.pending.get(&key).or_else(|| self.claims.get(&key)) {
            if existing == task_name {
                return Ok(table);
            }
            return Err(StorageError::SchemaDrift {
                table: table.to_string(),
                existing: existing.clone(),
                incoming: task_name.to_string(),
            });
        }

        let other: Option<String> = conn
            .query_row(
                "
                SELECT name
                FROM task_names
                WHERE tbl = ?1 COLLATE NOCASE AND name <> ?2
                LIMIT 1
                ",
                params![table.as_str(), task_name],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing) = other {
            return Err(StorageError::SchemaDrift {
                table: table.to_string(),
                existing,
                incoming: task_name.to_string(),
            });
        }

        ensure_task_table(conn, &table)?;
        self.pending.insert(key, task_name.to_string());
        Ok(table)
    }

    pub fn settle(&mut self) {
        self.claims.append(&mut self.pending);
    }

    pub fn discard(&mut self) {
        self.pending.clear();
    }

    pub fn claimed(&self, task_name: &str) -> bool {
        self.claims.values().any(|name| name == task_name)
    }
}

fn ensure_task_table(conn: &Connection, table: &TaskTable) -> Result<(), StorageError> {
    let quoted = table.quoted();
    let index = format!("\"idx_{}_id\"", table.as_str());
    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS {quoted} (
            rid                INTEGER PRIMARY KEY AUTOINCREMENT,
            id                 TEXT NOT NULL,
            name               TEXT NOT NULL,
            status             TEXT NOT NULL,
            importance         TEXT NOT NULL,
            assignee           TEXT NOT NULL,
            owner              TEXT NOT NULL,
            title              TEXT NOT NULL,
            milestone          TEXT NOT NULL,
            is_complete        INTEGER NOT NULL DEFAULT 0,
            date_created       INTEGER NOT NULL DEFAULT 0,
            date_assigned      INTEGER NOT NULL DEFAULT 0,
            date_new           INTEGER NOT NULL DEFAULT 0,
            date_incomplete    INTEGER NOT NULL DEFAULT 0,
            date_opinion       INTEGER NOT NULL DEFAULT 0,
            date_confirmed     INTEGER NOT NULL DEFAULT 0,
            date_triaged       INTEGER NOT NULL DEFAULT 0,
            date_in_progress   INTEGER NOT NULL DEFAULT 0,
            date_fix_committed INTEGER NOT NULL DEFAULT 0,
            date_fix_released  INTEGER NOT NULL DEFAULT 0,
            date_closed        INTEGER NOT NULL DEFAULT 0,
            date_left_new      INTEGER NOT NULL DEFAULT 0,
            date_left_closed   INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS {index} ON {quoted}(id);
        "
    ))?;
    debug!(event = "task_table_ensured", table = %table);
    Ok(())
}
