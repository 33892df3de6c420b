//! Pending lock requests, one queue file per repo.
//!
//! `locks/<hash>.queue` holds a JSON array of entries ordered by ascending
//! priority then arrival. The queue is advisory: nothing auto-promotes —
//! waiting callers re-request and the queue just makes the order fair.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One parked lock request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// The task that wants the lock.
    pub task_id: String,
    /// Who asked.
    pub agent: String,
    /// Requested file patterns (empty = whole repo).
    #[serde(default)]
    pub files: Vec<String>,
    /// When the request was parked.
    pub requested_at: String,
    /// Ascending priority (0 first).
    #[serde(default)]
    pub priority: i64,
}

/// Load a queue file; missing file is an empty queue.
///
/// # Errors
/// I/O failures other than not-found; a corrupt file parses to empty.
pub fn load(path: &Path) -> Result<Vec<QueueEntry>> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Persist a queue, deleting the file when it empties out.
///
/// # Errors
/// I/O or serialization failures.
pub fn save(path: &Path, entries: &[QueueEntry]) -> Result<()> {
    if entries.is_empty() {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        return Ok(());
    }
    fs::write(path, serde_json::to_string(entries)?)?;
    Ok(())
}

/// Insert an entry in priority-then-FIFO position and return its
/// zero-based slot. An entry for the same task is left where it is
/// (returns the existing position and `false`).
pub fn enqueue(entries: &mut Vec<QueueEntry>, entry: QueueEntry) -> (usize, bool) {
    if let Some(pos) = entries.iter().position(|e| e.task_id == entry.task_id) {
        return (pos, false);
    }
    // First slot whose priority is strictly worse keeps FIFO within a
    // priority band.
    let pos = entries
        .iter()
        .position(|e| e.priority > entry.priority)
        .unwrap_or(entries.len());
    entries.insert(pos, entry);
    (pos, true)
}

/// Drop a task's entry; true when something was removed.
pub fn dequeue(entries: &mut Vec<QueueEntry>, task_id: &str) -> bool {
    let before = entries.len();
    entries.retain(|e| e.task_id != task_id);
    entries.len() != before
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
