//! CLI command implementations.
//!
//! Each submodule owns one command family; shared output helpers live
//! here. Commands print plain lines to stdout and return `anyhow` errors
//! that the binary surfaces as a single `Error: ...` line with exit 1.

pub mod close;
pub mod dep;
pub mod init;
pub mod lock;
pub mod query;
pub mod run;
pub mod sync;
pub mod task;

use trak::model::Task;

/// One-line task summary used by list-style output.
pub(crate) fn summary_line(task: &Task) -> String {
    let mut line = format!(
        "{}  [P{}][{}]  {}",
        task.id, task.priority, task.status, task.title
    );
    if let Some(project) = &task.project {
        line.push_str(&format!("  ({project})"));
    }
    if let Some(agent) = &task.assigned_to {
        line.push_str(&format!("  @{agent}"));
    }
    line
}
