//! Append-only audit trail of lock transitions.
//!
//! Every acquire, release, expiry, break, queue movement, and conflict
//! lands one line in `locks/audit.jsonl`. The audit log is the recovery
//! record when the best-effort lock files race; it is never read back on
//! the hot path.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock;
use crate::error::Result;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The lock transition being recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A lock was taken (or re-taken/merged by its holder).
    Acquire,
    /// A lock was released by its holder.
    Release,
    /// A stale lock was removed (past expiry or dead holder).
    Expire,
    /// A lock was force-removed by someone other than the holder.
    Break,
    /// A request was parked in the repo's queue.
    Queue,
    /// A request left the queue.
    Dequeue,
    /// An acquire attempt was refused.
    Conflict,
}

/// One audit line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When it happened.
    pub ts: String,
    /// What happened.
    pub action: AuditAction,
    /// Absolute repo path the lock guards.
    pub repo: String,
    /// The task involved, when known.
    #[serde(default)]
    pub task: Option<String>,
    /// The agent involved, when known.
    #[serde(default)]
    pub agent: Option<String>,
    /// Extra context (break reason, conflicting files, queue position).
    #[serde(default)]
    pub detail: Option<String>,
}

impl AuditEvent {
    /// A new event stamped now.
    #[must_use]
    pub fn now(action: AuditAction, repo: &str) -> Self {
        Self {
            ts: clock::now(),
            action,
            repo: repo.to_owned(),
            task: None,
            agent: None,
            detail: None,
        }
    }

    /// Attach a task id.
    #[must_use]
    pub fn task(mut self, task: &str) -> Self {
        self.task = Some(task.to_owned());
        self
    }

    /// Attach an agent label.
    #[must_use]
    pub fn agent(mut self, agent: &str) -> Self {
        self.agent = Some(agent.to_owned());
        self
    }

    /// Attach free-form detail.
    #[must_use]
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ---------------------------------------------------------------------------
// AuditLog
// ---------------------------------------------------------------------------

/// Handle to `locks/audit.jsonl`.
#[derive(Clone, Debug)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Wrap the audit file (it need not exist yet).
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append one line. Failures are logged and swallowed — an audit
    /// hiccup must never fail the lock operation it describes.
    pub fn record(&self, event: &AuditEvent) {
        if let Err(e) = self.try_record(event) {
            warn!(error = %e, "lock audit append failed");
        }
    }

    fn try_record(&self, event: &AuditEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(event)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// All recorded events, oldest first. Unparseable lines are skipped.
    ///
    /// # Errors
    /// I/O failures other than a missing file.
    pub fn read_all(&self) -> Result<Vec<AuditEvent>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
