//! Task creation.

use crate::clock;
use crate::error::{Result, TrakError};
use crate::eventlog::Event;
use crate::model::{Autonomy, Task, TaskId};

use super::TaskEngine;

/// Everything `trak add` can set at creation time.
#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    /// Longer description.
    pub description: Option<String>,
    /// Grouping string.
    pub project: Option<String>,
    /// 0–3, default 1.
    pub priority: Option<i64>,
    /// Comma-joined tag set.
    pub tags: Option<String>,
    /// Parent task (resolved by suffix like any other id input).
    pub parent: Option<String>,
    /// Epic this task rolls up into.
    pub epic: Option<String>,
    /// Create as an epic.
    pub is_epic: bool,
    /// Dispatch policy, default `manual`.
    pub autonomy: Option<Autonomy>,
    /// USD ceiling.
    pub budget_usd: Option<f64>,
    /// Shell command the close gate will run.
    pub verify_command: Option<String>,
    /// Per-task dispatch timeout in seconds.
    pub timeout_seconds: Option<u64>,
    /// Attempt ceiling override (otherwise the config default).
    pub max_retries: Option<i64>,
    /// Provenance string.
    pub created_from: Option<String>,
    /// Agent session label.
    pub agent_session: Option<String>,
}

impl TaskEngine {
    /// Create a task with a fresh id.
    ///
    /// # Errors
    /// Validation failures (empty title, out-of-range priority, unknown
    /// parent/epic) and store failures.
    pub fn create(&self, title: &str, opts: &CreateOptions) -> Result<Task> {
        if title.trim().is_empty() {
            return Err(TrakError::validation("task title must not be empty"));
        }
        if let Some(p) = opts.priority
            && !(0..=3).contains(&p)
        {
            return Err(TrakError::validation(format!(
                "priority {p} out of range (0-3, 0 is highest)"
            )));
        }

        let now = clock::now();
        let mut task = Task::new(self.fresh_id()?, title.trim(), &now);
        if let Some(desc) = &opts.description {
            task.description.clone_from(desc);
        }
        task.project.clone_from(&opts.project);
        if let Some(p) = opts.priority {
            task.priority = p;
        }
        if let Some(tags) = &opts.tags {
            task.tags.clone_from(tags);
        }
        if let Some(parent) = &opts.parent {
            task.parent_id = Some(self.store().resolve_id(parent)?.as_str().to_owned());
        }
        if let Some(epic) = &opts.epic {
            task.epic_id = Some(self.store().resolve_id(epic)?.as_str().to_owned());
        }
        task.is_epic = opts.is_epic;
        if let Some(autonomy) = opts.autonomy {
            task.autonomy = autonomy;
        }
        task.budget_usd = opts.budget_usd;
        task.verify_command.clone_from(&opts.verify_command);
        task.timeout_seconds = opts.timeout_seconds;
        task.max_retries = opts
            .max_retries
            .unwrap_or(self.config().defaults.max_retries);
        task.created_from.clone_from(&opts.created_from);
        task.agent_session.clone_from(&opts.agent_session);

        let tx = self.store().begin()?;
        self.store().insert_task(&task)?;
        self.system_journal(task.id.as_str(), &now, "Task created")?;
        tx.commit()?;

        self.emit(&Event::create(&task, &now));
        self.autocommit(&format!("trak: create {}", task.id));
        Ok(task)
    }

    /// Delete a task and everything it owns. There is no delete event —
    /// the log is recompacted from the store so replay can't resurrect
    /// the task.
    ///
    /// # Errors
    /// [`TrakError::NotFound`] for an unknown id; store failures.
    pub fn delete(&self, needle: &str) -> Result<Task> {
        let task = self.resolve(needle)?;
        self.store().delete_task(task.id.as_str())?;
        match self.store().all_tasks_full() {
            Ok(remaining) => {
                if let Err(e) = self.log().compact(&remaining) {
                    tracing::warn!(error = %e, "log compaction after delete failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not re-export log after delete"),
        }
        self.autocommit(&format!("trak: delete {}", task.id));
        Ok(task)
    }

    /// A random id that is free in this store. Collisions are vanishingly
    /// rare at six hex chars for realistic task counts, but cheap to rule
    /// out entirely.
    fn fresh_id(&self) -> Result<TaskId> {
        loop {
            let id = TaskId::generate();
            if self.store().get_task(id.as_str())?.is_none() {
                return Ok(id);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
