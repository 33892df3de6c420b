//! Status transitions and assignment.

use serde_json::json;

use crate::clock;
use crate::error::Result;
use crate::eventlog::{Event, EventOp};
use crate::gitsync;
use crate::model::{Status, Task};

use super::TaskEngine;

impl TaskEngine {
    /// Move a task to a new status.
    ///
    /// Entering `wip` captures the repo's current git HEAD into
    /// `wip_snapshot` as the baseline for later proof-of-work checks.
    ///
    /// # Errors
    /// [`crate::error::TrakError::NotFound`] and store failures.
    pub fn set_status(&self, needle: &str, new: Status) -> Result<Task> {
        let mut task = self.resolve(needle)?;
        let old = task.status;
        if old == new {
            return Ok(task);
        }
        let now = clock::now();
        task.status = new;
        task.updated_at.clone_from(&now);
        if new == Status::Wip {
            task.wip_snapshot = self.repo_root().as_deref().and_then(gitsync::head);
        }

        let tx = self.store().begin()?;
        self.store().update_task(&task)?;
        self.system_journal(task.id.as_str(), &now, &format!("Status: {old} → {new}"))?;
        tx.commit()?;

        let mut data = json!({"status": new.as_str()});
        if let Some(snapshot) = &task.wip_snapshot
            && new == Status::Wip
        {
            data["wip_snapshot"] = json!(snapshot);
        }
        self.emit(&Event::new(EventOp::Update, task.id.as_str(), &now, data));
        self.autocommit(&format!("trak: {} → {new}", task.id));
        Ok(task)
    }

    /// Assign an agent. `open` and `review` tasks auto-transition into
    /// `wip` (capturing the git baseline like any other wip entry).
    ///
    /// # Errors
    /// [`crate::error::TrakError::NotFound`] and store failures.
    pub fn assign(&self, needle: &str, agent: &str) -> Result<Task> {
        let mut task = self.resolve(needle)?;
        let now = clock::now();
        let old = task.status;
        let auto_wip = matches!(old, Status::Open | Status::Review);

        task.assigned_to = Some(agent.to_owned());
        task.updated_at.clone_from(&now);
        if auto_wip {
            task.status = Status::Wip;
            task.wip_snapshot = self.repo_root().as_deref().and_then(gitsync::head);
        }

        let tx = self.store().begin()?;
        self.store().update_task(&task)?;
        if auto_wip {
            self.system_journal(task.id.as_str(), &now, &format!("Status: {old} → wip"))?;
        }
        self.system_journal(
            task.id.as_str(),
            &now,
            &format!("{agent} assigned to this task"),
        )?;
        tx.commit()?;

        let mut data = json!({"assigned_to": agent});
        if auto_wip {
            data["status"] = json!("wip");
            if let Some(snapshot) = &task.wip_snapshot {
                data["wip_snapshot"] = json!(snapshot);
            }
        }
        self.emit(&Event::new(EventOp::Update, task.id.as_str(), &now, data));
        self.autocommit(&format!("trak: assign {} to {agent}", task.id));
        Ok(task)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::engine;
    use crate::engine::CreateOptions;

    #[test]
    fn status_change_journals_the_transition() {
        let (e, _tmp) = engine();
        let task = e.create("t", &CreateOptions::default()).expect("create");
        let task = e.set_status(task.id.as_str(), Status::Blocked).expect("status");
        assert_eq!(task.status, Status::Blocked);

        let journal = e.store().journal_for(task.id.as_str()).expect("journal");
        assert!(journal.iter().any(|j| j.entry == "Status: open → blocked"));
    }

    #[test]
    fn noop_status_change_writes_nothing() {
        let (e, _tmp) = engine();
        let task = e.create("t", &CreateOptions::default()).expect("create");
        let before = e.store().journal_for(task.id.as_str()).expect("journal").len();
        e.set_status(task.id.as_str(), Status::Open).expect("status");
        let after = e.store().journal_for(task.id.as_str()).expect("journal").len();
        assert_eq!(before, after);
    }

    #[test]
    fn assign_auto_transitions_open_to_wip() {
        let (e, _tmp) = engine();
        let task = e.create("t", &CreateOptions::default()).expect("create");
        let task = e.assign(task.id.as_str(), "codex-1").expect("assign");

        assert_eq!(task.status, Status::Wip);
        assert_eq!(task.assigned_to.as_deref(), Some("codex-1"));
        let journal = e.store().journal_for(task.id.as_str()).expect("journal");
        assert!(journal.iter().any(|j| j.entry.contains("codex-1 assigned")));
        assert!(journal.iter().any(|j| j.entry == "Status: open → wip"));
    }

    #[test]
    fn assign_leaves_wip_status_alone() {
        let (e, _tmp) = engine();
        let task = e.create("t", &CreateOptions::default()).expect("create");
        e.set_status(task.id.as_str(), Status::Wip).expect("status");
        let task = e.assign(task.id.as_str(), "codex-2").expect("assign");
        assert_eq!(task.status, Status::Wip);
    }

    #[test]
    fn status_events_reach_the_log() {
        let (e, _tmp) = engine();
        let task = e.create("t", &CreateOptions::default()).expect("create");
        e.set_status(task.id.as_str(), Status::Review).expect("status");
        let raw = e.log().read_raw().expect("read");
        assert!(raw.contains("\"status\":\"review\""));
    }
}
