//! Error types for trak operations.
//!
//! [`TrakError`] is the single error type returned by the engine, store,
//! lock manager, and cost engine. Variants map onto the error taxonomy the
//! CLI reports: not-found, validation, conflict, budget, gateway, and the
//! fatal pair (missing workspace, corrupt log). Messages name the offending
//! entity so an agent reading stderr can act without extra context.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, TrakError>;

/// Unified error type for trak operations.
#[derive(Debug, Error)]
pub enum TrakError {
    /// An unknown task id, file, or record.
    #[error("not found: {what}")]
    NotFound {
        /// What was missing (includes the id the caller used).
        what: String,
    },

    /// Input failed validation (illegal status, out-of-range priority,
    /// self-dependency, malformed id).
    #[error("{message}")]
    Validation {
        /// Why the input was rejected.
        message: String,
    },

    /// A lock is held by another task, a task is already claimed, or the
    /// close gate blocked the transition.
    #[error("{message}")]
    Conflict {
        /// What conflicted and with whom.
        message: String,
    },

    /// The task's budget is exhausted; dispatch is suppressed.
    #[error("task {id} is over budget (${spent:.2} of ${budget:.2})")]
    Budget {
        /// The over-budget task.
        id: String,
        /// Cumulative spend so far.
        spent: f64,
        /// The configured ceiling.
        budget: f64,
    },

    /// No `.trak/` workspace exists here and the command is not `init`.
    #[error("no trak workspace found — run `trak init` first")]
    InitRequired,

    /// The event log could not be parsed, even after merge resolution.
    #[error("corrupt event log at {}: {detail}", path.display())]
    Corrupt {
        /// Path to the offending file.
        path: PathBuf,
        /// What failed to parse.
        detail: String,
    },

    /// The gateway was unreachable or rejected the request after retries.
    #[error(transparent)]
    Gateway(#[from] trak_gateway::GatewayError),

    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    /// I/O failure (lock files, event log, config).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure outside the corrupt-log path.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrakError {
    /// Shorthand for a task-id lookup miss.
    #[must_use]
    pub fn task_not_found(id: &str) -> Self {
        Self::NotFound {
            what: format!("task '{id}'"),
        }
    }

    /// Shorthand for a validation failure.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a conflict.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }
}

impl From<crate::model::id::IdError> for TrakError {
    fn from(err: crate::model::id::IdError) -> Self {
        Self::Validation {
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
