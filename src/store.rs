//! Embedded relational store.
//!
//! One SQLite file per workspace (`.trak/trak.db`), opened per command —
//! there is no long-lived pool. WAL journaling and foreign keys are always
//! on. Schema migration is idempotent: tables and indexes are created if
//! absent, and any expected `tasks` column missing from an older database
//! is added with its default.
//!
//! The store is a rebuildable materialization of the event log; replay can
//! clear and repopulate every table in one transaction.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Transaction, params, params_from_iter};

use crate::cost::CostEvent;
use crate::error::{Result, TrakError};
use crate::model::{ClaimRecord, ClaimStatus, JournalEntry, Status, Task, TaskId};

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS tasks (
  id TEXT PRIMARY KEY,
  title TEXT NOT NULL DEFAULT '',
  description TEXT NOT NULL DEFAULT '',
  status TEXT NOT NULL DEFAULT 'open',
  priority INTEGER NOT NULL DEFAULT 1,
  project TEXT,
  blocked_by TEXT,
  parent_id TEXT,
  epic_id TEXT,
  is_epic INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL DEFAULT '',
  updated_at TEXT NOT NULL DEFAULT '',
  agent_session TEXT,
  tokens_used INTEGER NOT NULL DEFAULT 0,
  cost_usd REAL NOT NULL DEFAULT 0,
  tags TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS task_log (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
  timestamp TEXT NOT NULL,
  entry TEXT NOT NULL,
  author TEXT NOT NULL DEFAULT 'human'
);

CREATE TABLE IF NOT EXISTS dependencies (
  task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
  depends_on TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
  UNIQUE(task_id, depends_on)
);

CREATE TABLE IF NOT EXISTS task_claims (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
  agent TEXT NOT NULL,
  model TEXT,
  status TEXT NOT NULL DEFAULT 'claimed',
  claimed_at TEXT NOT NULL,
  released_at TEXT
);

CREATE TABLE IF NOT EXISTS cost_events (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
  timestamp TEXT NOT NULL,
  model TEXT,
  tokens_in INTEGER NOT NULL DEFAULT 0,
  tokens_out INTEGER NOT NULL DEFAULT 0,
  cost_usd REAL NOT NULL DEFAULT 0,
  duration_seconds REAL NOT NULL DEFAULT 0,
  agent TEXT,
  operation TEXT,
  metadata TEXT
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project);
CREATE INDEX IF NOT EXISTS idx_tasks_priority ON tasks(priority);
CREATE INDEX IF NOT EXISTS idx_tasks_epic ON tasks(epic_id);
CREATE INDEX IF NOT EXISTS idx_task_log_task ON task_log(task_id);
CREATE INDEX IF NOT EXISTS idx_deps_child ON dependencies(task_id);
CREATE INDEX IF NOT EXISTS idx_deps_parent ON dependencies(depends_on);
";

/// Columns added to `tasks` after the original schema. Migration adds any
/// of these that an older database lacks.
const TASK_COLUMN_UPGRADES: &[(&str, &str)] = &[
    ("assigned_to", "TEXT"),
    ("verified_by", "TEXT"),
    ("verification_status", "TEXT NOT NULL DEFAULT 'unset'"),
    ("created_from", "TEXT"),
    ("verify_command", "TEXT"),
    ("wip_snapshot", "TEXT"),
    ("autonomy", "TEXT NOT NULL DEFAULT 'manual'"),
    ("budget_usd", "REAL"),
    ("tokens_in", "INTEGER NOT NULL DEFAULT 0"),
    ("tokens_out", "INTEGER NOT NULL DEFAULT 0"),
    ("model_used", "TEXT"),
    ("duration_seconds", "REAL NOT NULL DEFAULT 0"),
    ("retry_count", "INTEGER NOT NULL DEFAULT 0"),
    ("max_retries", "INTEGER NOT NULL DEFAULT 3"),
    ("last_failure_reason", "TEXT"),
    ("retry_after", "TEXT"),
    ("timeout_seconds", "INTEGER"),
];

/// Column list for task SELECTs, kept in one place so row mapping and the
/// queries can't drift apart.
const TASK_COLUMNS: &str = "id, title, description, status, priority, project, blocked_by, \
     parent_id, epic_id, is_epic, created_at, updated_at, agent_session, tokens_used, \
     cost_usd, tags, assigned_to, verified_by, verification_status, created_from, \
     verify_command, wip_snapshot, autonomy, budget_usd, tokens_in, tokens_out, \
     model_used, duration_seconds, retry_count, max_retries, last_failure_reason, \
     retry_after, timeout_seconds";

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Criteria for [`Store::list_tasks`].
#[derive(Clone, Debug, Default)]
pub struct TaskFilter {
    /// Only this status.
    pub status: Option<Status>,
    /// Only this project.
    pub project: Option<String>,
    /// Include `done` and `archived` tasks (excluded by default unless a
    /// status filter names them).
    pub include_closed: bool,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Handle to the workspace's SQLite database.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating and migrating as needed) the store at `path`.
    ///
    /// # Errors
    /// Any SQLite failure opening or migrating the database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// In-memory store for tests.
    ///
    /// # Errors
    /// Any SQLite failure.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::migrate(&conn)?;
        Ok(Self { conn })
    }

    fn migrate(conn: &Connection) -> Result<()> {
        conn.execute_batch(CREATE_TABLES)?;

        let existing: Vec<String> = conn
            .prepare("PRAGMA table_info(tasks)")?
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<_, _>>()?;
        for (name, decl) in TASK_COLUMN_UPGRADES {
            if !existing.iter().any(|c| c == name) {
                conn.execute_batch(&format!("ALTER TABLE tasks ADD COLUMN {name} {decl}"))?;
            }
        }
        Ok(())
    }

    /// Begin a transaction spanning subsequent store calls on this handle.
    /// Dropping without [`Transaction::commit`] rolls back.
    ///
    /// # Errors
    /// Any SQLite failure.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    // -- task CRUD ----------------------------------------------------------

    /// Insert a new task row.
    ///
    /// # Errors
    /// Constraint violations (duplicate id) and other SQLite failures.
    pub fn insert_task(&self, t: &Task) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, \
                 ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, \
                 ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33)"
            ),
            params_from_iter(task_params(t)),
        )?;
        Ok(())
    }

    /// Write every scalar field of `t` back to its row.
    ///
    /// # Errors
    /// [`TrakError::NotFound`] if the row is gone, or SQLite failures.
    pub fn update_task(&self, t: &Task) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE tasks SET title = ?2, description = ?3, status = ?4, priority = ?5, \
             project = ?6, blocked_by = ?7, parent_id = ?8, epic_id = ?9, is_epic = ?10, \
             created_at = ?11, updated_at = ?12, agent_session = ?13, tokens_used = ?14, \
             cost_usd = ?15, tags = ?16, assigned_to = ?17, verified_by = ?18, \
             verification_status = ?19, created_from = ?20, verify_command = ?21, \
             wip_snapshot = ?22, autonomy = ?23, budget_usd = ?24, tokens_in = ?25, \
             tokens_out = ?26, model_used = ?27, duration_seconds = ?28, retry_count = ?29, \
             max_retries = ?30, last_failure_reason = ?31, retry_after = ?32, \
             timeout_seconds = ?33 WHERE id = ?1",
            params_from_iter(task_params(t)),
        )?;
        if changed == 0 {
            return Err(TrakError::task_not_found(t.id.as_str()));
        }
        Ok(())
    }

    /// Fetch one task row (journal, deps, and claims not loaded).
    ///
    /// # Errors
    /// SQLite failures.
    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        self.conn
            .prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"))?
            .query_row(params![id], task_from_row)
            .optional()
            .map_err(TrakError::from)
    }

    /// Fetch one task with journal, dependency ids, and claims embedded.
    ///
    /// # Errors
    /// SQLite failures.
    pub fn load_task(&self, id: &str) -> Result<Option<Task>> {
        let Some(mut task) = self.get_task(id)? else {
            return Ok(None);
        };
        task.journal = self.journal_for(id)?;
        task.deps = self.deps_of(id)?;
        task.claims = self.claims_for(id)?;
        Ok(Some(task))
    }

    /// Resolve user input to a task id: exact match first, then a unique
    /// suffix match.
    ///
    /// # Errors
    /// [`TrakError::NotFound`] when nothing matches; a validation error
    /// when the suffix is ambiguous.
    pub fn resolve_id(&self, needle: &str) -> Result<TaskId> {
        let exact: Option<String> = self
            .conn
            .prepare("SELECT id FROM tasks WHERE id = ?1")?
            .query_row(params![needle], |row| row.get(0))
            .optional()?;
        if let Some(id) = exact {
            return Ok(TaskId::new(&id)?);
        }

        let mut stmt = self
            .conn
            .prepare("SELECT id FROM tasks WHERE id LIKE '%' || ?1 ORDER BY id")?;
        let matches: Vec<String> = stmt
            .query_map(params![needle], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        match matches.as_slice() {
            [] => Err(TrakError::task_not_found(needle)),
            [one] => Ok(TaskId::new(one)?),
            many => Err(TrakError::validation(format!(
                "'{needle}' is ambiguous — matches {}",
                many.join(", ")
            ))),
        }
    }

    /// Delete a task; journal, deps, claims, and cost events cascade.
    ///
    /// # Errors
    /// SQLite failures.
    pub fn delete_task(&self, id: &str) -> Result<bool> {
        let changed = self.conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// List task rows matching `filter`, ordered by priority then age.
    ///
    /// # Errors
    /// SQLite failures.
    pub fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            args.push(Box::new(status.as_str().to_owned()));
        } else if !filter.include_closed {
            sql.push_str(" AND status NOT IN ('done', 'archived')");
        }
        if let Some(project) = &filter.project {
            sql.push_str(" AND project = ?");
            args.push(Box::new(project.clone()));
        }
        sql.push_str(" ORDER BY priority ASC, created_at ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let refs: Vec<&dyn rusqlite::types::ToSql> = args.iter().map(AsRef::as_ref).collect();
        let rows = stmt.query_map(refs.as_slice(), task_from_row)?;
        rows.collect::<std::result::Result<_, _>>().map_err(TrakError::from)
    }

    /// Every task, fully loaded, sorted by creation time. Used by snapshot
    /// compaction and the sync export.
    ///
    /// # Errors
    /// SQLite failures.
    pub fn all_tasks_full(&self) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt.query_map([], task_from_row)?;
        let mut tasks: Vec<Task> = rows.collect::<std::result::Result<_, _>>()?;
        for task in &mut tasks {
            let id = task.id.as_str().to_owned();
            task.journal = self.journal_for(&id)?;
            task.deps = self.deps_of(&id)?;
            task.claims = self.claims_for(&id)?;
        }
        Ok(tasks)
    }

    // -- journal ------------------------------------------------------------

    /// Append one journal entry.
    ///
    /// # Errors
    /// SQLite failures (including a missing task via the foreign key).
    pub fn append_journal(&self, task_id: &str, ts: &str, entry: &str, author: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO task_log (task_id, timestamp, entry, author) VALUES (?1, ?2, ?3, ?4)",
            params![task_id, ts, entry, author],
        )?;
        Ok(())
    }

    /// Journal entries for a task, oldest first.
    ///
    /// # Errors
    /// SQLite failures.
    pub fn journal_for(&self, task_id: &str) -> Result<Vec<JournalEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, entry, author FROM task_log WHERE task_id = ?1 \
             ORDER BY timestamp ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![task_id], |row| {
            Ok(JournalEntry {
                timestamp: row.get(0)?,
                entry: row.get(1)?,
                author: row.get(2)?,
            })
        })?;
        rows.collect::<std::result::Result<_, _>>().map_err(TrakError::from)
    }

    // -- dependencies -------------------------------------------------------

    /// Insert an edge; returns `false` when the pair already exists.
    ///
    /// # Errors
    /// SQLite failures (including unknown endpoints via foreign keys).
    pub fn add_dep(&self, child: &str, parent: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO dependencies (task_id, depends_on) VALUES (?1, ?2)",
            params![child, parent],
        )?;
        Ok(changed > 0)
    }

    /// Remove an edge; returns `false` when it was not present.
    ///
    /// # Errors
    /// SQLite failures.
    pub fn rm_dep(&self, child: &str, parent: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM dependencies WHERE task_id = ?1 AND depends_on = ?2",
            params![child, parent],
        )?;
        Ok(changed > 0)
    }

    /// Ids this task depends on.
    ///
    /// # Errors
    /// SQLite failures.
    pub fn deps_of(&self, id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT depends_on FROM dependencies WHERE task_id = ?1 ORDER BY depends_on")?;
        let rows = stmt.query_map(params![id], |row| row.get(0))?;
        rows.collect::<std::result::Result<_, _>>().map_err(TrakError::from)
    }

    /// Ids that depend on this task.
    ///
    /// # Errors
    /// SQLite failures.
    pub fn dependents_of(&self, id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT task_id FROM dependencies WHERE depends_on = ?1 ORDER BY task_id")?;
        let rows = stmt.query_map(params![id], |row| row.get(0))?;
        rows.collect::<std::result::Result<_, _>>().map_err(TrakError::from)
    }

    /// Dependent counts for every task that has any, in one query. Feeds
    /// the heat computation.
    ///
    /// # Errors
    /// SQLite failures.
    pub fn dependent_counts(&self) -> Result<HashMap<String, i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT depends_on, COUNT(*) FROM dependencies GROUP BY depends_on")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        rows.collect::<std::result::Result<_, _>>().map_err(TrakError::from)
    }

    // -- claims -------------------------------------------------------------

    /// Claim history for a task, oldest first.
    ///
    /// # Errors
    /// SQLite failures.
    pub fn claims_for(&self, task_id: &str) -> Result<Vec<ClaimRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT agent, model, status, claimed_at, released_at FROM task_claims \
             WHERE task_id = ?1 ORDER BY claimed_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![task_id], |row| {
            let status: String = row.get(2)?;
            Ok(ClaimRecord {
                agent: row.get(0)?,
                model: row.get(1)?,
                status: if status == "released" {
                    ClaimStatus::Released
                } else {
                    ClaimStatus::Claimed
                },
                claimed_at: row.get(3)?,
                released_at: row.get(4)?,
            })
        })?;
        rows.collect::<std::result::Result<_, _>>().map_err(TrakError::from)
    }

    /// Record a new claim.
    ///
    /// # Errors
    /// SQLite failures.
    pub fn insert_claim(&self, task_id: &str, claim: &ClaimRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO task_claims (task_id, agent, model, status, claimed_at, released_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                task_id,
                claim.agent,
                claim.model,
                claim.status.to_string(),
                claim.claimed_at,
                claim.released_at,
            ],
        )?;
        Ok(())
    }

    /// Mark the active claim by `agent` as released. Returns `false` when
    /// no active claim matched.
    ///
    /// # Errors
    /// SQLite failures.
    pub fn release_claim(&self, task_id: &str, agent: &str, ts: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE task_claims SET status = 'released', released_at = ?3 \
             WHERE task_id = ?1 AND agent = ?2 AND status = 'claimed'",
            params![task_id, agent, ts],
        )?;
        Ok(changed > 0)
    }

    // -- cost events --------------------------------------------------------

    /// Insert one cost event row (aggregate bumping is the cost engine's
    /// job, inside the same transaction).
    ///
    /// # Errors
    /// SQLite failures.
    pub fn insert_cost_event(&self, ev: &CostEvent) -> Result<()> {
        self.conn.execute(
            "INSERT INTO cost_events (task_id, timestamp, model, tokens_in, tokens_out, \
             cost_usd, duration_seconds, agent, operation, metadata) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                ev.task_id,
                ev.timestamp,
                ev.model,
                ev.tokens_in,
                ev.tokens_out,
                ev.cost_usd,
                ev.duration_seconds,
                ev.agent,
                ev.operation,
                ev.metadata,
            ],
        )?;
        Ok(())
    }

    /// Cost events for a task, oldest first.
    ///
    /// # Errors
    /// SQLite failures.
    pub fn cost_events_for(&self, task_id: &str) -> Result<Vec<CostEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT task_id, timestamp, model, tokens_in, tokens_out, cost_usd, \
             duration_seconds, agent, operation, metadata FROM cost_events \
             WHERE task_id = ?1 ORDER BY timestamp ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![task_id], |row| {
            Ok(CostEvent {
                task_id: row.get(0)?,
                timestamp: row.get(1)?,
                model: row.get(2)?,
                tokens_in: row.get(3)?,
                tokens_out: row.get(4)?,
                cost_usd: row.get(5)?,
                duration_seconds: row.get(6)?,
                agent: row.get(7)?,
                operation: row.get(8)?,
                metadata: row.get(9)?,
            })
        })?;
        rows.collect::<std::result::Result<_, _>>().map_err(TrakError::from)
    }

    // -- rebuild ------------------------------------------------------------

    /// Replace the entire task universe with `tasks` (full records, with
    /// journal/deps/claims embedded) in one transaction. Used after event
    /// log replay and merge resolution.
    ///
    /// # Errors
    /// SQLite failures; the transaction rolls back on any of them.
    pub fn replace_all(&self, tasks: &[Task]) -> Result<()> {
        let tx = self.begin()?;
        self.conn.execute("DELETE FROM task_claims", [])?;
        self.conn.execute("DELETE FROM task_log", [])?;
        self.conn.execute("DELETE FROM dependencies", [])?;
        self.conn.execute("DELETE FROM tasks", [])?;
        for task in tasks {
            self.insert_task(task)?;
        }
        // Edges second so both endpoints exist regardless of input order.
        for task in tasks {
            let id = task.id.as_str();
            for entry in &task.journal {
                self.append_journal(id, &entry.timestamp, &entry.entry, &entry.author)?;
            }
            for parent in &task.deps {
                // Edges to vanished tasks are dropped rather than aborting
                // the whole rebuild.
                if self.get_task(parent)?.is_some() {
                    self.add_dep(id, parent)?;
                }
            }
            for claim in &task.claims {
                self.insert_claim(id, claim)?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn parse_col<T: std::str::FromStr<Err = String>>(
    idx: usize,
    raw: &str,
) -> std::result::Result<T, rusqlite::Error> {
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::other(e)),
        )
    })
}

fn task_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<Task, rusqlite::Error> {
    let id: String = row.get(0)?;
    let id = TaskId::new(&id).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let status: String = row.get(3)?;
    let verification: String = row.get(18)?;
    let autonomy: String = row.get(22)?;
    Ok(Task {
        id,
        title: row.get(1)?,
        description: row.get(2)?,
        status: parse_col(3, &status)?,
        priority: row.get(4)?,
        project: row.get(5)?,
        blocked_by: row.get(6)?,
        parent_id: row.get(7)?,
        epic_id: row.get(8)?,
        is_epic: row.get::<_, i64>(9)? != 0,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        agent_session: row.get(12)?,
        tokens_used: row.get(13)?,
        cost_usd: row.get(14)?,
        tags: row.get(15)?,
        assigned_to: row.get(16)?,
        verified_by: row.get(17)?,
        verification_status: parse_col(18, &verification)?,
        created_from: row.get(19)?,
        verify_command: row.get(20)?,
        wip_snapshot: row.get(21)?,
        autonomy: parse_col(22, &autonomy)?,
        budget_usd: row.get(23)?,
        tokens_in: row.get(24)?,
        tokens_out: row.get(25)?,
        model_used: row.get(26)?,
        duration_seconds: row.get(27)?,
        retry_count: row.get(28)?,
        max_retries: row.get(29)?,
        last_failure_reason: row.get(30)?,
        retry_after: row.get(31)?,
        timeout_seconds: row.get::<_, Option<i64>>(32)?.and_then(|v| u64::try_from(v).ok()),
        journal: Vec::new(),
        deps: Vec::new(),
        claims: Vec::new(),
    })
}

fn task_params(t: &Task) -> Vec<Box<dyn rusqlite::types::ToSql>> {
    vec![
        Box::new(t.id.as_str().to_owned()),
        Box::new(t.title.clone()),
        Box::new(t.description.clone()),
        Box::new(t.status.as_str().to_owned()),
        Box::new(t.priority),
        Box::new(t.project.clone()),
        Box::new(t.blocked_by.clone()),
        Box::new(t.parent_id.clone()),
        Box::new(t.epic_id.clone()),
        Box::new(i64::from(t.is_epic)),
        Box::new(t.created_at.clone()),
        Box::new(t.updated_at.clone()),
        Box::new(t.agent_session.clone()),
        Box::new(t.tokens_used),
        Box::new(t.cost_usd),
        Box::new(t.tags.clone()),
        Box::new(t.assigned_to.clone()),
        Box::new(t.verified_by.clone()),
        Box::new(t.verification_status.as_str().to_owned()),
        Box::new(t.created_from.clone()),
        Box::new(t.verify_command.clone()),
        Box::new(t.wip_snapshot.clone()),
        Box::new(t.autonomy.as_str().to_owned()),
        Box::new(t.budget_usd),
        Box::new(t.tokens_in),
        Box::new(t.tokens_out),
        Box::new(t.model_used.clone()),
        Box::new(t.duration_seconds),
        Box::new(t.retry_count),
        Box::new(t.max_retries),
        Box::new(t.last_failure_reason.clone()),
        Box::new(t.retry_after.clone()),
        Box::new(t.timeout_seconds.and_then(|v| i64::try_from(v).ok())),
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Autonomy;

    fn store() -> Store {
        Store::open_in_memory().expect("in-memory store")
    }

    fn task(id: &str, title: &str) -> Task {
        Task::new(TaskId::new(id).expect("valid id"), title, "2026-08-01 10:00:00")
    }

    #[test]
    fn insert_and_get_round_trip() {
        let s = store();
        let mut t = task("trak-0000aa", "First");
        t.autonomy = Autonomy::Auto;
        t.budget_usd = Some(2.5);
        t.tags = "db,urgent".to_owned();
        t.timeout_seconds = Some(1200);
        s.insert_task(&t).expect("insert");

        let got = s.get_task("trak-0000aa").expect("get").expect("present");
        assert_eq!(got, t);
    }

    #[test]
    fn update_persists_changes() {
        let s = store();
        let mut t = task("trak-0000aa", "First");
        s.insert_task(&t).expect("insert");
        t.status = Status::Wip;
        t.retry_count = 2;
        t.updated_at = "2026-08-01 11:00:00".to_owned();
        s.update_task(&t).expect("update");

        let got = s.get_task("trak-0000aa").expect("get").expect("present");
        assert_eq!(got.status, Status::Wip);
        assert_eq!(got.retry_count, 2);
    }

    #[test]
    fn update_missing_is_not_found() {
        let s = store();
        let t = task("trak-0000aa", "ghost");
        let err = s.update_task(&t).unwrap_err();
        assert!(matches!(err, TrakError::NotFound { .. }));
    }

    #[test]
    fn resolve_id_exact_and_suffix() {
        let s = store();
        s.insert_task(&task("trak-0000aa", "a")).expect("insert");
        s.insert_task(&task("trak-1111bb", "b")).expect("insert");

        assert_eq!(s.resolve_id("trak-0000aa").expect("exact").as_str(), "trak-0000aa");
        assert_eq!(s.resolve_id("11bb").expect("suffix").as_str(), "trak-1111bb");
        assert!(matches!(s.resolve_id("zz"), Err(TrakError::NotFound { .. })));
    }

    #[test]
    fn resolve_id_ambiguous_suffix() {
        let s = store();
        s.insert_task(&task("trak-00aaff", "a")).expect("insert");
        s.insert_task(&task("trak-11aaff", "b")).expect("insert");
        let err = s.resolve_id("aaff").unwrap_err();
        assert!(matches!(err, TrakError::Validation { .. }));
        assert!(format!("{err}").contains("ambiguous"));
    }

    #[test]
    fn journal_appends_in_order() {
        let s = store();
        s.insert_task(&task("trak-0000aa", "a")).expect("insert");
        s.append_journal("trak-0000aa", "2026-08-01 10:01:00", "one", "human")
            .expect("append");
        s.append_journal("trak-0000aa", "2026-08-01 10:02:00", "two", "system")
            .expect("append");

        let entries = s.journal_for("trak-0000aa").expect("journal");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entry, "one");
        assert_eq!(entries[1].author, "system");
    }

    #[test]
    fn dep_edges_unique_and_cascading() {
        let s = store();
        s.insert_task(&task("trak-0000aa", "child")).expect("insert");
        s.insert_task(&task("trak-1111bb", "parent")).expect("insert");

        assert!(s.add_dep("trak-0000aa", "trak-1111bb").expect("add"));
        assert!(!s.add_dep("trak-0000aa", "trak-1111bb").expect("dup"));
        assert_eq!(s.deps_of("trak-0000aa").expect("deps"), vec!["trak-1111bb"]);
        assert_eq!(s.dependents_of("trak-1111bb").expect("rdeps"), vec!["trak-0000aa"]);

        // Deleting the parent removes the edge.
        assert!(s.delete_task("trak-1111bb").expect("delete"));
        assert!(s.deps_of("trak-0000aa").expect("deps").is_empty());
    }

    #[test]
    fn dep_to_unknown_task_fails_foreign_key() {
        let s = store();
        s.insert_task(&task("trak-0000aa", "child")).expect("insert");
        assert!(s.add_dep("trak-0000aa", "trak-ffffff").is_err());
    }

    #[test]
    fn claims_round_trip_and_release() {
        let s = store();
        s.insert_task(&task("trak-0000aa", "a")).expect("insert");
        let claim = ClaimRecord {
            agent: "codex-1".to_owned(),
            model: Some("claude-opus-4-5".to_owned()),
            status: ClaimStatus::Claimed,
            claimed_at: "2026-08-01 10:01:00".to_owned(),
            released_at: None,
        };
        s.insert_claim("trak-0000aa", &claim).expect("claim");

        assert!(s.release_claim("trak-0000aa", "codex-1", "2026-08-01 10:05:00").expect("release"));
        assert!(!s.release_claim("trak-0000aa", "codex-1", "2026-08-01 10:06:00").expect("noop"));

        let claims = s.claims_for("trak-0000aa").expect("claims");
        assert_eq!(claims[0].status, ClaimStatus::Released);
        assert_eq!(claims[0].released_at.as_deref(), Some("2026-08-01 10:05:00"));
    }

    #[test]
    fn list_filters_and_excludes_closed() {
        let s = store();
        let mut a = task("trak-0000aa", "open one");
        a.project = Some("web".to_owned());
        s.insert_task(&a).expect("insert");
        let mut b = task("trak-1111bb", "done one");
        b.status = Status::Done;
        s.insert_task(&b).expect("insert");

        let open = s.list_tasks(&TaskFilter::default()).expect("list");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id.as_str(), "trak-0000aa");

        let all = s
            .list_tasks(&TaskFilter { include_closed: true, ..TaskFilter::default() })
            .expect("list all");
        assert_eq!(all.len(), 2);

        let web = s
            .list_tasks(&TaskFilter { project: Some("web".to_owned()), ..TaskFilter::default() })
            .expect("list web");
        assert_eq!(web.len(), 1);

        let done = s
            .list_tasks(&TaskFilter { status: Some(Status::Done), ..TaskFilter::default() })
            .expect("list done");
        assert_eq!(done.len(), 1);
    }

    #[test]
    fn replace_all_rebuilds_everything() {
        let s = store();
        s.insert_task(&task("trak-99999f", "stale")).expect("insert");

        let mut a = task("trak-0000aa", "a");
        a.journal.push(JournalEntry {
            timestamp: "2026-08-01 10:01:00".to_owned(),
            entry: "note".to_owned(),
            author: "human".to_owned(),
        });
        let b = task("trak-1111bb", "b");
        let mut a2 = a.clone();
        a2.deps = vec!["trak-1111bb".to_owned(), "trak-eeeeee".to_owned()];

        s.replace_all(&[a2, b]).expect("rebuild");

        assert!(s.get_task("trak-99999f").expect("get").is_none());
        let a_loaded = s.load_task("trak-0000aa").expect("load").expect("present");
        assert_eq!(a_loaded.journal.len(), 1);
        // The edge to the vanished trak-eeeeee is dropped; the real one kept.
        assert_eq!(a_loaded.deps, vec!["trak-1111bb"]);
    }

    #[test]
    fn migration_is_idempotent_and_upgrades_old_schema() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let db = tmp.path().join("trak.db");
        {
            // Simulate a pre-upgrade database missing the newer columns.
            let conn = Connection::open(&db).expect("open");
            conn.execute_batch(
                "CREATE TABLE tasks (id TEXT PRIMARY KEY, title TEXT NOT NULL DEFAULT '', \
                 description TEXT NOT NULL DEFAULT '', status TEXT NOT NULL DEFAULT 'open', \
                 priority INTEGER NOT NULL DEFAULT 1, project TEXT, blocked_by TEXT, \
                 parent_id TEXT, epic_id TEXT, is_epic INTEGER NOT NULL DEFAULT 0, \
                 created_at TEXT NOT NULL DEFAULT '', updated_at TEXT NOT NULL DEFAULT '', \
                 agent_session TEXT, tokens_used INTEGER NOT NULL DEFAULT 0, \
                 cost_usd REAL NOT NULL DEFAULT 0, tags TEXT NOT NULL DEFAULT '');
                 INSERT INTO tasks (id, title) VALUES ('trak-0000aa', 'old row');",
            )
            .expect("seed old schema");
        }

        let s = Store::open(&db).expect("open migrates");
        let t = s.get_task("trak-0000aa").expect("get").expect("present");
        assert_eq!(t.max_retries, 3);
        assert_eq!(t.verification_status, crate::model::VerificationStatus::Unset);

        // Opening again must not fail.
        drop(s);
        Store::open(&db).expect("reopen");
    }

    #[test]
    fn cost_events_round_trip() {
        let s = store();
        s.insert_task(&task("trak-0000aa", "a")).expect("insert");
        let ev = CostEvent {
            task_id: "trak-0000aa".to_owned(),
            timestamp: "2026-08-01 10:01:00".to_owned(),
            model: Some("claude-opus-4-5".to_owned()),
            tokens_in: 1000,
            tokens_out: 500,
            cost_usd: 0.04,
            duration_seconds: 12.5,
            agent: Some("codex-1".to_owned()),
            operation: Some("close".to_owned()),
            metadata: None,
        };
        s.insert_cost_event(&ev).expect("insert event");
        let got = s.cost_events_for("trak-0000aa").expect("events");
        assert_eq!(got, vec![ev]);
    }
}
