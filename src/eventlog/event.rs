//! Event records — one JSON line per mutation.
//!
//! The event log mixes two physical formats in one file: event lines
//! (`{op, id, ts, data}`) and snapshot lines (a full [`Task`] record per
//! line, written by compaction). A line is an event iff it carries both
//! `op` and `ts`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::Task;

// ---------------------------------------------------------------------------
// EventOp
// ---------------------------------------------------------------------------

/// The mutation kind an event records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOp {
    /// A task came into existence; `data` holds its initial fields.
    Create,
    /// Fields changed; `data` holds only the changed fields.
    Update,
    /// The task closed; `data.status` may override the default `done`.
    Close,
    /// A dependency edge was added; `data.depends_on` names the parent.
    DepAdd,
    /// A dependency edge was removed.
    DepRm,
    /// A journal entry was appended; `data` holds `{entry, author}`.
    Log,
    /// A claim was recorded; `data` holds the claim fields.
    Claim,
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One event-log line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The mutation kind.
    pub op: EventOp,
    /// The task this event belongs to.
    pub id: String,
    /// When it happened (`YYYY-MM-DD HH:MM:SS`, UTC).
    pub ts: String,
    /// Only the changed fields.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Event {
    /// Build an event from any serializable `data` payload.
    ///
    /// Payloads that do not serialize to a JSON object become an empty
    /// `data` map (events carry objects only).
    #[must_use]
    pub fn new(op: EventOp, id: &str, ts: &str, data: impl Serialize) -> Self {
        let data = match serde_json::to_value(data) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Self {
            op,
            id: id.to_owned(),
            ts: ts.to_owned(),
            data,
        }
    }

    /// A `create` event carrying the full initial record of `task`
    /// (minus the embedded collections, which replay reconstructs from
    /// their own events).
    #[must_use]
    pub fn create(task: &Task, ts: &str) -> Self {
        let mut bare = task.clone();
        bare.journal = Vec::new();
        bare.deps = Vec::new();
        bare.claims = Vec::new();
        Self::new(EventOp::Create, task.id.as_str(), ts, &bare)
    }
}

/// True if a parsed JSON object is an event line (rather than a snapshot
/// line). Events carry both `op` and `ts`.
#[must_use]
pub fn is_event_object(obj: &Map<String, Value>) -> bool {
    obj.contains_key("op") && obj.contains_key("ts")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskId;
    use serde_json::json;

    #[test]
    fn event_line_shape() {
        let ev = Event::new(
            EventOp::Update,
            "trak-0000aa",
            "2026-08-01 10:00:00",
            json!({"status": "wip"}),
        );
        let line = serde_json::to_string(&ev).expect("serialize");
        assert!(line.contains("\"op\":\"update\""));
        assert!(line.contains("\"id\":\"trak-0000aa\""));
        assert!(line.contains("\"ts\":\"2026-08-01 10:00:00\""));
        assert!(line.contains("\"status\":\"wip\""));
    }

    #[test]
    fn op_serde_names_are_snake_case() {
        assert_eq!(serde_json::to_string(&EventOp::DepAdd).expect("json"), "\"dep_add\"");
        assert_eq!(serde_json::to_string(&EventOp::DepRm).expect("json"), "\"dep_rm\"");
    }

    #[test]
    fn create_event_carries_full_record() {
        let mut task = Task::new(
            TaskId::new("trak-0000aa").expect("id"),
            "Title",
            "2026-08-01 10:00:00",
        );
        task.deps.push("trak-1111bb".to_owned());
        let ev = Event::create(&task, "2026-08-01 10:00:00");
        assert_eq!(ev.op, EventOp::Create);
        assert_eq!(ev.data.get("title"), Some(&Value::String("Title".to_owned())));
        // Collections are rebuilt from their own events, not embedded here.
        assert_eq!(ev.data.get("deps"), Some(&json!([])));
    }

    #[test]
    fn event_detection() {
        let ev: Map<String, Value> = serde_json::from_str(
            r#"{"op":"create","id":"trak-0000aa","ts":"2026-08-01 10:00:00","data":{}}"#,
        )
        .expect("parse");
        assert!(is_event_object(&ev));

        let snap: Map<String, Value> =
            serde_json::from_str(r#"{"id":"trak-0000aa","title":"x"}"#).expect("parse");
        assert!(!is_event_object(&snap));
    }

    #[test]
    fn non_object_data_becomes_empty() {
        let ev = Event::new(EventOp::Log, "trak-0000aa", "2026-08-01 10:00:00", json!(42));
        assert!(ev.data.is_empty());
    }
}
