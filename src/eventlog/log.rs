//! The append-only log file: append, compact, replay.
//!
//! `<trak-dir>/trak.jsonl` is the durable source of truth. Mutations append
//! one event line each; compaction atomically rewrites the file as one
//! snapshot line per task (write `.tmp` sibling, rename). Replay detects
//! which format the file holds by inspecting the first non-blank line and
//! reconstructs the full task set either way.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{Result, TrakError};
use crate::model::{Task, TaskId};

use super::event::{Event, EventOp, is_event_object};

// ---------------------------------------------------------------------------
// EventLog
// ---------------------------------------------------------------------------

/// Handle to the workspace's event log file.
#[derive(Clone, Debug)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    /// Wrap the log at `path` (it need not exist yet).
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// The log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event line.
    ///
    /// # Errors
    /// I/O or serialization failures. Callers on the mutation path treat
    /// this as best-effort and only log the failure.
    pub fn append(&self, event: &Event) -> Result<()> {
        let line = serde_json::to_string(event)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Atomically replace the log with one snapshot line per task.
    ///
    /// Tasks should arrive sorted by creation time ([`crate::store::Store::all_tasks_full`]
    /// already does this); the order is preserved verbatim.
    ///
    /// # Errors
    /// I/O or serialization failures. The original file is untouched unless
    /// the rename succeeds.
    pub fn compact(&self, tasks: &[Task]) -> Result<()> {
        let tmp = self.tmp_path();
        {
            let mut file = fs::File::create(&tmp)?;
            for task in tasks {
                let line = serde_json::to_string(task)?;
                writeln!(file, "{line}")?;
            }
            file.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Raw file contents; empty string when the file does not exist.
    ///
    /// # Errors
    /// I/O failures other than not-found.
    pub fn read_raw(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Reconstruct the full task set from the log.
    ///
    /// # Errors
    /// [`TrakError::Corrupt`] when a line fails to parse or the file still
    /// contains git conflict markers.
    pub fn replay(&self) -> Result<Vec<Task>> {
        let content = self.read_raw()?;
        self.replay_str(&content)
    }

    /// Replay from an in-memory string (the merge path resolves first,
    /// then replays the resolved content before writing it back).
    ///
    /// # Errors
    /// [`TrakError::Corrupt`] on unparseable content.
    pub fn replay_str(&self, content: &str) -> Result<Vec<Task>> {
        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let Some(first) = lines.first() else {
            return Ok(Vec::new());
        };

        if super::merge::has_conflict_markers(content) {
            return Err(self.corrupt("git conflict markers present — run `trak sync --resolve`"));
        }

        let first_obj: Map<String, Value> = serde_json::from_str(first)
            .map_err(|e| self.corrupt(&format!("first line is not a JSON object: {e}")))?;

        if is_event_object(&first_obj) {
            self.replay_events(&lines)
        } else {
            self.replay_snapshots(&lines)
        }
    }

    fn replay_snapshots(&self, lines: &[&str]) -> Result<Vec<Task>> {
        let mut tasks = Vec::with_capacity(lines.len());
        for (n, line) in lines.iter().enumerate() {
            let task: Task = serde_json::from_str(line)
                .map_err(|e| self.corrupt(&format!("snapshot line {}: {e}", n + 1)))?;
            tasks.push(task);
        }
        finalize(tasks)
    }

    fn replay_events(&self, lines: &[&str]) -> Result<Vec<Task>> {
        // Fold events into one JSON object per task, then deserialize once
        // at the end so field defaults apply uniformly.
        let mut records: Vec<(String, Map<String, Value>)> = Vec::new();

        for (n, line) in lines.iter().enumerate() {
            let event: Event = serde_json::from_str(line)
                .map_err(|e| self.corrupt(&format!("event line {}: {e}", n + 1)))?;
            if TaskId::new(&event.id).is_err() {
                warn!(id = %event.id, "skipping event with malformed task id");
                continue;
            }
            apply_event(&mut records, &event);
        }

        let mut tasks = Vec::with_capacity(records.len());
        for (id, map) in records {
            match serde_json::from_value::<Task>(Value::Object(map)) {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    return Err(self.corrupt(&format!("replayed record for '{id}': {e}")));
                }
            }
        }
        finalize(tasks)
    }

    fn corrupt(&self, detail: &str) -> TrakError {
        TrakError::Corrupt {
            path: self.path.clone(),
            detail: detail.to_owned(),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map_or_else(|| "trak.jsonl".to_owned(), |n| n.to_string_lossy().into_owned());
        name.push_str(".tmp");
        self.path.with_file_name(name)
    }
}

// ---------------------------------------------------------------------------
// Event folding
// ---------------------------------------------------------------------------

fn record_mut<'a>(
    records: &'a mut Vec<(String, Map<String, Value>)>,
    id: &str,
    ts: &str,
) -> &'a mut Map<String, Value> {
    if let Some(pos) = records.iter().position(|(rid, _)| rid == id) {
        return &mut records[pos].1;
    }
    records.push((id.to_owned(), default_record(id, ts)));
    let last = records.len() - 1;
    &mut records[last].1
}

/// A fresh record with every default applied, stamped with the event time.
fn default_record(id: &str, ts: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("id".to_owned(), Value::String(id.to_owned()));
    map.insert("created_at".to_owned(), Value::String(ts.to_owned()));
    map.insert("updated_at".to_owned(), Value::String(ts.to_owned()));
    map
}

fn push_array(map: &mut Map<String, Value>, key: &str, value: Value) {
    match map.get_mut(key) {
        Some(Value::Array(arr)) => arr.push(value),
        _ => {
            map.insert(key.to_owned(), Value::Array(vec![value]));
        }
    }
}

fn apply_event(records: &mut Vec<(String, Map<String, Value>)>, event: &Event) {
    let map = record_mut(records, &event.id, &event.ts);
    match event.op {
        EventOp::Create => {
            for (k, v) in &event.data {
                map.insert(k.clone(), v.clone());
            }
            map.insert("id".to_owned(), Value::String(event.id.clone()));
            if !event.data.contains_key("created_at") {
                map.insert("created_at".to_owned(), Value::String(event.ts.clone()));
            }
            if !event.data.contains_key("updated_at") {
                map.insert("updated_at".to_owned(), Value::String(event.ts.clone()));
            }
        }
        EventOp::Update => {
            for (k, v) in &event.data {
                map.insert(k.clone(), v.clone());
            }
            map.insert("updated_at".to_owned(), Value::String(event.ts.clone()));
        }
        EventOp::Close => {
            for (k, v) in &event.data {
                map.insert(k.clone(), v.clone());
            }
            if !event.data.contains_key("status") {
                map.insert("status".to_owned(), Value::String("done".to_owned()));
            }
            map.insert("updated_at".to_owned(), Value::String(event.ts.clone()));
        }
        EventOp::Log => {
            let entry = event
                .data
                .get("entry")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let author = event
                .data
                .get("author")
                .and_then(Value::as_str)
                .unwrap_or("human");
            let ts = event
                .data
                .get("timestamp")
                .and_then(Value::as_str)
                .unwrap_or(&event.ts);
            push_array(
                map,
                "journal",
                serde_json::json!({"timestamp": ts, "entry": entry, "author": author}),
            );
        }
        EventOp::DepAdd => {
            if let Some(parent) = event.data.get("depends_on").and_then(Value::as_str) {
                let exists = map
                    .get("deps")
                    .and_then(Value::as_array)
                    .is_some_and(|a| a.iter().any(|v| v.as_str() == Some(parent)));
                if !exists {
                    push_array(map, "deps", Value::String(parent.to_owned()));
                }
            }
        }
        EventOp::DepRm => {
            if let Some(parent) = event.data.get("depends_on").and_then(Value::as_str)
                && let Some(Value::Array(arr)) = map.get_mut("deps")
            {
                arr.retain(|v| v.as_str() != Some(parent));
            }
        }
        EventOp::Claim => {
            let mut claim = Map::new();
            claim.insert(
                "agent".to_owned(),
                event.data.get("agent").cloned().unwrap_or_else(|| Value::String(String::new())),
            );
            if let Some(model) = event.data.get("model") {
                claim.insert("model".to_owned(), model.clone());
            }
            claim.insert(
                "status".to_owned(),
                event
                    .data
                    .get("status")
                    .cloned()
                    .unwrap_or_else(|| Value::String("claimed".to_owned())),
            );
            claim.insert(
                "claimed_at".to_owned(),
                event
                    .data
                    .get("claimed_at")
                    .cloned()
                    .unwrap_or_else(|| Value::String(event.ts.clone())),
            );
            if let Some(released) = event.data.get("released_at") {
                claim.insert("released_at".to_owned(), released.clone());
            }
            push_array(map, "claims", Value::Object(claim));
        }
    }
}

/// Sort embedded collections by timestamp and the task set by creation
/// time, matching snapshot/compaction order.
fn finalize(mut tasks: Vec<Task>) -> Result<Vec<Task>> {
    for task in &mut tasks {
        task.journal.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        task.claims.sort_by(|a, b| a.claimed_at.cmp(&b.claimed_at));
    }
    tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok(tasks)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Status;
    use serde_json::json;

    fn log_in(dir: &Path) -> EventLog {
        EventLog::new(dir.join("trak.jsonl"))
    }

    #[test]
    fn replay_of_missing_file_is_empty() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let log = log_in(tmp.path());
        assert!(log.replay().expect("replay").is_empty());
    }

    #[test]
    fn append_then_replay_event_format() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let log = log_in(tmp.path());

        log.append(&Event::new(
            EventOp::Create,
            "trak-0000aa",
            "2026-08-01 10:00:00",
            json!({"title": "First", "priority": 0}),
        ))
        .expect("append");
        log.append(&Event::new(
            EventOp::Update,
            "trak-0000aa",
            "2026-08-01 10:05:00",
            json!({"status": "wip"}),
        ))
        .expect("append");
        log.append(&Event::new(
            EventOp::Log,
            "trak-0000aa",
            "2026-08-01 10:06:00",
            json!({"entry": "did work", "author": "agent-1"}),
        ))
        .expect("append");

        let tasks = log.replay().expect("replay");
        assert_eq!(tasks.len(), 1);
        let t = &tasks[0];
        assert_eq!(t.title, "First");
        assert_eq!(t.priority, 0);
        assert_eq!(t.status, Status::Wip);
        assert_eq!(t.updated_at, "2026-08-01 10:05:00");
        assert_eq!(t.journal.len(), 1);
        assert_eq!(t.journal[0].author, "agent-1");
    }

    #[test]
    fn close_event_defaults_to_done() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let log = log_in(tmp.path());
        log.append(&Event::new(
            EventOp::Create,
            "trak-0000aa",
            "2026-08-01 10:00:00",
            json!({"title": "t"}),
        ))
        .expect("append");
        log.append(&Event::new(
            EventOp::Close,
            "trak-0000aa",
            "2026-08-01 11:00:00",
            json!({"cost_usd": 0.25}),
        ))
        .expect("append");

        let tasks = log.replay().expect("replay");
        assert_eq!(tasks[0].status, Status::Done);
        assert!((tasks[0].cost_usd - 0.25).abs() < f64::EPSILON);
        assert_eq!(tasks[0].updated_at, "2026-08-01 11:00:00");
    }

    #[test]
    fn dep_events_mutate_the_set() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let log = log_in(tmp.path());
        for (op, parent) in [
            (EventOp::DepAdd, "trak-1111bb"),
            (EventOp::DepAdd, "trak-2222cc"),
            (EventOp::DepAdd, "trak-1111bb"), // duplicate is a no-op
            (EventOp::DepRm, "trak-2222cc"),
        ] {
            log.append(&Event::new(
                op,
                "trak-0000aa",
                "2026-08-01 10:00:00",
                json!({"depends_on": parent}),
            ))
            .expect("append");
        }

        let tasks = log.replay().expect("replay");
        assert_eq!(tasks[0].deps, vec!["trak-1111bb"]);
    }

    #[test]
    fn claim_events_accumulate() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let log = log_in(tmp.path());
        log.append(&Event::new(
            EventOp::Claim,
            "trak-0000aa",
            "2026-08-01 10:00:00",
            json!({"agent": "codex-1", "model": "claude-opus-4-5"}),
        ))
        .expect("append");

        let tasks = log.replay().expect("replay");
        assert_eq!(tasks[0].claims.len(), 1);
        assert_eq!(tasks[0].claims[0].agent, "codex-1");
        assert_eq!(tasks[0].claims[0].claimed_at, "2026-08-01 10:00:00");
    }

    #[test]
    fn compact_then_replay_snapshot_format() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let log = log_in(tmp.path());

        let mut a = Task::new(
            TaskId::new("trak-0000aa").expect("id"),
            "a",
            "2026-08-01 10:00:00",
        );
        a.journal.push(crate::model::JournalEntry {
            timestamp: "2026-08-01 10:01:00".to_owned(),
            entry: "note".to_owned(),
            author: "human".to_owned(),
        });
        let b = Task::new(
            TaskId::new("trak-1111bb").expect("id"),
            "b",
            "2026-08-01 09:00:00",
        );

        log.compact(&[b.clone(), a.clone()]).expect("compact");
        let tasks = log.replay().expect("replay");
        assert_eq!(tasks.len(), 2);
        // Sorted by created_at on the way out.
        assert_eq!(tasks[0].id.as_str(), "trak-1111bb");
        assert_eq!(tasks[1].journal.len(), 1);

        // No stray tmp file left behind.
        assert!(!tmp.path().join("trak.jsonl.tmp").exists());
    }

    #[test]
    fn replay_events_with_updates_before_create_is_lenient() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let log = log_in(tmp.path());
        log.append(&Event::new(
            EventOp::Update,
            "trak-0000aa",
            "2026-08-01 10:00:00",
            json!({"title": "implicit"}),
        ))
        .expect("append");
        let tasks = log.replay().expect("replay");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "implicit");
    }

    #[test]
    fn malformed_ids_are_skipped() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let log = log_in(tmp.path());
        log.append(&Event::new(
            EventOp::Create,
            "not-an-id",
            "2026-08-01 10:00:00",
            json!({"title": "x"}),
        ))
        .expect("append");
        assert!(log.replay().expect("replay").is_empty());
    }

    #[test]
    fn garbage_line_is_corrupt() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let log = log_in(tmp.path());
        fs::write(log.path(), "not json\n").expect("write");
        assert!(matches!(log.replay(), Err(TrakError::Corrupt { .. })));
    }

    #[test]
    fn conflict_markers_are_reported_as_corrupt() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let log = log_in(tmp.path());
        fs::write(
            log.path(),
            "<<<<<<< HEAD\n{\"id\":\"trak-0000aa\"}\n=======\n{\"id\":\"trak-0000aa\"}\n>>>>>>> theirs\n",
        )
        .expect("write");
        let err = log.replay().unwrap_err();
        assert!(format!("{err}").contains("sync --resolve"));
    }
}
