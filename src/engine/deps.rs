//! Dependency edges.

use serde_json::json;

use crate::clock;
use crate::error::{Result, TrakError};
use crate::eventlog::{Event, EventOp};
use crate::graph;

use super::TaskEngine;

/// What a dependency mutation did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepOutcome {
    /// Edge inserted.
    Added,
    /// Edge already existed (soft warning, not an error).
    Duplicate,
    /// Edge removed.
    Removed,
    /// Edge was not there to remove.
    Missing,
}

impl TaskEngine {
    /// Add `child depends on parent`. Self-dependencies and edges that
    /// would close a cycle are rejected; a duplicate edge is a soft
    /// warning.
    ///
    /// # Errors
    /// [`TrakError::NotFound`], validation failures, store failures.
    pub fn dep_add(&self, child: &str, parent: &str) -> Result<DepOutcome> {
        let child = self.store().resolve_id(child)?;
        let parent = self.store().resolve_id(parent)?;
        if child == parent {
            return Err(TrakError::validation(format!(
                "task {child} cannot depend on itself"
            )));
        }
        if graph::would_cycle(self.store(), child.as_str(), parent.as_str())? {
            return Err(TrakError::validation(format!(
                "dependency {child} → {parent} would create a cycle"
            )));
        }

        let added = self.store().add_dep(child.as_str(), parent.as_str())?;
        if !added {
            return Ok(DepOutcome::Duplicate);
        }
        self.emit(&Event::new(
            EventOp::DepAdd,
            child.as_str(),
            &clock::now(),
            json!({"depends_on": parent.as_str()}),
        ));
        self.autocommit(&format!("trak: dep {child} → {parent}"));
        Ok(DepOutcome::Added)
    }

    /// Remove `child depends on parent`.
    ///
    /// # Errors
    /// [`TrakError::NotFound`] and store failures.
    pub fn dep_rm(&self, child: &str, parent: &str) -> Result<DepOutcome> {
        let child = self.store().resolve_id(child)?;
        let parent = self.store().resolve_id(parent)?;

        let removed = self.store().rm_dep(child.as_str(), parent.as_str())?;
        if !removed {
            return Ok(DepOutcome::Missing);
        }
        self.emit(&Event::new(
            EventOp::DepRm,
            child.as_str(),
            &clock::now(),
            json!({"depends_on": parent.as_str()}),
        ));
        self.autocommit(&format!("trak: undep {child} → {parent}"));
        Ok(DepOutcome::Removed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
