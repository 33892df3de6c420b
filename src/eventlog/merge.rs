//! Merge resolver for git-conflicted event logs.
//!
//! When two branches both append to `trak.jsonl`, git leaves standard
//! conflict markers behind. The resolver partitions the file into shared
//! lines (outside any marker), ours (between `<<<<<<<` and `=======`), and
//! theirs (between `=======` and `>>>>>>>`), parses every line as a task
//! snapshot, and resolves duplicated ids last-write-wins on `updated_at`
//! (ties go to theirs). Ids present on only one side are kept. Callers
//! write the resolved records back and rebuild the store.

use std::collections::BTreeMap;
use std::fmt;

use crate::model::Task;

/// Start-of-ours conflict marker prefix.
const MARKER_OURS: &str = "<<<<<<<";
/// Separator marker prefix.
const MARKER_SEP: &str = "=======";
/// End-of-theirs marker prefix.
const MARKER_THEIRS: &str = ">>>>>>>";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which side won a duplicated task id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Winner {
    /// Our side had the later `updated_at`.
    Ours,
    /// Their side had the later (or equal) `updated_at`.
    Theirs,
}

impl fmt::Display for Winner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ours => f.write_str("ours"),
            Self::Theirs => f.write_str("theirs"),
        }
    }
}

/// Record of one resolved duplicate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// The task id that appeared on both sides.
    pub task_id: String,
    /// Which record was kept.
    pub winner: Winner,
}

// ---------------------------------------------------------------------------
// Detection & partitioning
// ---------------------------------------------------------------------------

/// True if `content` contains a git conflict region.
#[must_use]
pub fn has_conflict_markers(content: &str) -> bool {
    content.lines().any(|l| l.starts_with(MARKER_OURS))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Section {
    Shared,
    Ours,
    Theirs,
}

fn partition(content: &str) -> (Vec<&str>, Vec<&str>, Vec<&str>) {
    let mut shared = Vec::new();
    let mut ours = Vec::new();
    let mut theirs = Vec::new();
    let mut section = Section::Shared;

    for line in content.lines() {
        if line.starts_with(MARKER_OURS) {
            section = Section::Ours;
            continue;
        }
        if line.starts_with(MARKER_SEP) && section == Section::Ours {
            section = Section::Theirs;
            continue;
        }
        if line.starts_with(MARKER_THEIRS) {
            section = Section::Shared;
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        match section {
            Section::Shared => shared.push(line),
            Section::Ours => ours.push(line),
            Section::Theirs => theirs.push(line),
        }
    }
    (shared, ours, theirs)
}

fn parse_side(lines: &[&str], side: &str) -> Result<BTreeMap<String, Task>, String> {
    let mut map = BTreeMap::new();
    for (n, line) in lines.iter().enumerate() {
        let task: Task = serde_json::from_str(line)
            .map_err(|e| format!("{side} line {}: {e}", n + 1))?;
        map.insert(task.id.as_str().to_owned(), task);
    }
    Ok(map)
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve a conflicted log into a clean record set.
///
/// Returns the resolved tasks (sorted by `created_at`) and one
/// [`Resolution`] per task id that appeared on both sides. Content without
/// conflict markers resolves to its own records with an empty resolution
/// list.
///
/// # Errors
/// Returns a description of the first unparseable line.
pub fn resolve(content: &str) -> Result<(Vec<Task>, Vec<Resolution>), String> {
    let (shared_lines, ours_lines, theirs_lines) = partition(content);

    let shared = parse_side(&shared_lines, "shared")?;
    let ours = parse_side(&ours_lines, "ours")?;
    let theirs = parse_side(&theirs_lines, "theirs")?;

    let mut resolved: BTreeMap<String, Task> = shared;
    let mut resolutions = Vec::new();

    for (id, our_task) in ours {
        match theirs.get(&id) {
            Some(their_task) => {
                // Timestamps are the fixed-width format, so string compare
                // is chronological. Ties go to theirs.
                let winner = if our_task.updated_at > their_task.updated_at {
                    Winner::Ours
                } else {
                    Winner::Theirs
                };
                let kept = match winner {
                    Winner::Ours => our_task,
                    Winner::Theirs => their_task.clone(),
                };
                resolutions.push(Resolution { task_id: id.clone(), winner });
                resolved.insert(id, kept);
            }
            None => {
                resolved.insert(id, our_task);
            }
        }
    }
    for (id, their_task) in theirs {
        resolved.entry(id).or_insert(their_task);
    }

    let mut tasks: Vec<Task> = resolved.into_values().collect();
    tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok((tasks, resolutions))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskId;

    fn snap(id: &str, created: &str, updated: &str, title: &str) -> String {
        let mut t = Task::new(TaskId::new(id).expect("id"), title, created);
        t.updated_at = updated.to_owned();
        serde_json::to_string(&t).expect("serialize")
    }

    #[test]
    fn detects_markers() {
        assert!(has_conflict_markers("<<<<<<< HEAD\nx\n"));
        assert!(!has_conflict_markers("{\"id\":\"trak-0000aa\"}\n"));
    }

    #[test]
    fn clean_content_passes_through() {
        let content = format!(
            "{}\n{}\n",
            snap("trak-0000aa", "2026-08-01 09:00:00", "2026-08-01 09:00:00", "a"),
            snap("trak-1111bb", "2026-08-01 10:00:00", "2026-08-01 10:00:00", "b"),
        );
        let (tasks, resolutions) = resolve(&content).expect("resolve");
        assert_eq!(tasks.len(), 2);
        assert!(resolutions.is_empty());
    }

    #[test]
    fn later_updated_at_wins() {
        let shared = snap("trak-eeeeee", "2026-08-01 08:00:00", "2026-08-01 08:00:00", "shared");
        let ours = snap("trak-0000aa", "2026-08-01 09:00:00", "2026-08-01 10:00:00", "ours version");
        let theirs = snap("trak-0000aa", "2026-08-01 09:00:00", "2026-08-01 12:00:00", "theirs version");
        let content = format!(
            "{shared}\n<<<<<<< HEAD\n{ours}\n=======\n{theirs}\n>>>>>>> origin/main\n"
        );

        let (tasks, resolutions) = resolve(&content).expect("resolve");
        assert_eq!(tasks.len(), 2);
        let x = tasks
            .iter()
            .find(|t| t.id.as_str() == "trak-0000aa")
            .expect("task kept");
        assert_eq!(x.title, "theirs version");
        assert_eq!(
            resolutions,
            vec![Resolution { task_id: "trak-0000aa".to_owned(), winner: Winner::Theirs }]
        );
    }

    #[test]
    fn ours_wins_when_newer() {
        let ours = snap("trak-0000aa", "2026-08-01 09:00:00", "2026-08-01 12:00:00", "ours");
        let theirs = snap("trak-0000aa", "2026-08-01 09:00:00", "2026-08-01 10:00:00", "theirs");
        let content = format!("<<<<<<< HEAD\n{ours}\n=======\n{theirs}\n>>>>>>> other\n");

        let (tasks, resolutions) = resolve(&content).expect("resolve");
        assert_eq!(tasks[0].title, "ours");
        assert_eq!(resolutions[0].winner, Winner::Ours);
    }

    #[test]
    fn ties_go_to_theirs() {
        let ours = snap("trak-0000aa", "2026-08-01 09:00:00", "2026-08-01 10:00:00", "ours");
        let theirs = snap("trak-0000aa", "2026-08-01 09:00:00", "2026-08-01 10:00:00", "theirs");
        let content = format!("<<<<<<< HEAD\n{ours}\n=======\n{theirs}\n>>>>>>> other\n");

        let (tasks, resolutions) = resolve(&content).expect("resolve");
        assert_eq!(tasks[0].title, "theirs");
        assert_eq!(resolutions[0].winner, Winner::Theirs);
    }

    #[test]
    fn one_sided_ids_are_kept() {
        let ours = snap("trak-0000aa", "2026-08-01 09:00:00", "2026-08-01 09:00:00", "only ours");
        let theirs = snap("trak-1111bb", "2026-08-01 10:00:00", "2026-08-01 10:00:00", "only theirs");
        let content = format!("<<<<<<< HEAD\n{ours}\n=======\n{theirs}\n>>>>>>> other\n");

        let (tasks, resolutions) = resolve(&content).expect("resolve");
        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["trak-0000aa", "trak-1111bb"]);
        assert!(resolutions.is_empty());
    }

    #[test]
    fn output_sorted_by_created_at() {
        let ours = snap("trak-0000aa", "2026-08-01 11:00:00", "2026-08-01 11:00:00", "late");
        let theirs = snap("trak-1111bb", "2026-08-01 09:00:00", "2026-08-01 09:00:00", "early");
        let content = format!("<<<<<<< HEAD\n{ours}\n=======\n{theirs}\n>>>>>>> other\n");

        let (tasks, _) = resolve(&content).expect("resolve");
        assert_eq!(tasks[0].id.as_str(), "trak-1111bb");
    }

    #[test]
    fn unparseable_line_is_an_error() {
        let content = "<<<<<<< HEAD\nnot json\n=======\n{}\n>>>>>>> other\n";
        let err = resolve(content).unwrap_err();
        assert!(err.contains("ours line 1"));
    }

    #[test]
    fn multiple_conflict_regions() {
        let ours_a = snap("trak-0000aa", "2026-08-01 09:00:00", "2026-08-01 13:00:00", "ours a");
        let theirs_a = snap("trak-0000aa", "2026-08-01 09:00:00", "2026-08-01 10:00:00", "theirs a");
        let ours_b = snap("trak-1111bb", "2026-08-01 09:30:00", "2026-08-01 09:45:00", "ours b");
        let theirs_b = snap("trak-1111bb", "2026-08-01 09:30:00", "2026-08-01 11:00:00", "theirs b");
        let content = format!(
            "<<<<<<< HEAD\n{ours_a}\n=======\n{theirs_a}\n>>>>>>> other\n\
             <<<<<<< HEAD\n{ours_b}\n=======\n{theirs_b}\n>>>>>>> other\n"
        );

        let (tasks, resolutions) = resolve(&content).expect("resolve");
        assert_eq!(tasks.len(), 2);
        assert_eq!(resolutions.len(), 2);
        assert_eq!(tasks[0].title, "ours a");
        assert_eq!(tasks[1].title, "theirs b");
    }
}
