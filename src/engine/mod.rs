//! The task engine — the single mutator.
//!
//! Every public operation follows the same shape: resolve the id (exact or
//! unique suffix), validate, apply the change in one store transaction,
//! journal anything observable, append one event to the log, and — when
//! autocommit is on — poke git. The event append and the git hook are
//! best-effort: the primary mutation stands even if they fail.
//!
//! Operations live in sibling modules: [`create`], [`status`], [`close`],
//! [`fail`], [`notes`], [`deps`].

pub mod close;
pub mod create;
pub mod deps;
pub mod fail;
pub mod notes;
pub mod status;

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::TrakConfig;
use crate::cost::CostEngine;
use crate::error::{Result, TrakError};
use crate::eventlog::{Event, EventLog};
use crate::locks::LockManager;
use crate::model::{JournalEntry, Task};
use crate::paths::{self, TrakPaths};
use crate::store::Store;

pub use close::{CheckResult, CloseOptions, CloseOutcome, CostAdditions};
pub use create::CreateOptions;
pub use deps::DepOutcome;
pub use notes::{ClaimOutcome, LogOptions};

// ---------------------------------------------------------------------------
// TaskEngine
// ---------------------------------------------------------------------------

/// Bound handle to one workspace: store, event log, and config.
pub struct TaskEngine {
    store: Store,
    log: EventLog,
    paths: TrakPaths,
    config: TrakConfig,
}

impl TaskEngine {
    /// Open the workspace found by the standard discovery walk.
    ///
    /// # Errors
    /// [`TrakError::InitRequired`] when there is no workspace; store and
    /// config failures.
    pub fn open() -> Result<Self> {
        Self::at(paths::resolve()?)
    }

    /// Open a specific workspace (tests and `init` use this).
    ///
    /// # Errors
    /// Store and config failures.
    pub fn at(paths: TrakPaths) -> Result<Self> {
        let store = Store::open(&paths.db())?;
        let log = EventLog::new(paths.event_log());
        let config = TrakConfig::load(&paths.config())?;
        Ok(Self { store, log, paths, config })
    }

    /// The underlying store (read paths go straight here).
    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// The event log.
    #[must_use]
    pub const fn log(&self) -> &EventLog {
        &self.log
    }

    /// Workspace locations.
    #[must_use]
    pub const fn paths(&self) -> &TrakPaths {
        &self.paths
    }

    /// Workspace configuration.
    #[must_use]
    pub const fn config(&self) -> &TrakConfig {
        &self.config
    }

    /// A cost engine bound to this workspace.
    #[must_use]
    pub const fn cost(&self) -> CostEngine<'_> {
        CostEngine::new(&self.store, &self.log)
    }

    /// A lock manager bound to this workspace, using the configured
    /// expiry.
    #[must_use]
    pub fn locks(&self) -> LockManager {
        LockManager::new(self.paths.locks_dir(), self.config.lock_timeout_minutes())
    }

    /// Resolve user input (full id or unique suffix) to a loaded task.
    ///
    /// # Errors
    /// [`TrakError::NotFound`] or an ambiguity error.
    pub fn resolve(&self, needle: &str) -> Result<Task> {
        let id = self.store.resolve_id(needle)?;
        self.store
            .load_task(id.as_str())?
            .ok_or_else(|| TrakError::task_not_found(needle))
    }

    /// The repo directory git side-effects operate in: the directory
    /// containing `.trak/`.
    #[must_use]
    pub fn repo_root(&self) -> Option<PathBuf> {
        self.paths.project_root().map(Path::to_path_buf)
    }

    // -- shared plumbing ----------------------------------------------------

    /// Append one event, best-effort.
    pub(crate) fn emit(&self, event: &Event) {
        if let Err(e) = self.log.append(event) {
            warn!(op = ?event.op, id = %event.id, error = %e, "event log append failed");
        }
    }

    /// Run the post-mutation git hook when enabled. Best-effort and
    /// silent; not reentrant (the sync path never calls back in here).
    pub(crate) fn autocommit(&self, message: &str) {
        if self.config.git.autocommit {
            crate::gitsync::autocommit(self.paths.root(), message);
        }
    }

    /// Append an engine-authored journal entry.
    pub(crate) fn system_journal(&self, id: &str, ts: &str, text: &str) -> Result<()> {
        self.store
            .append_journal(id, ts, text, JournalEntry::SYSTEM_AUTHOR)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
