//! The task record and its satellite types.
//!
//! [`Task`] is the primary entity: a unit of work moving through the
//! `open → wip → review → done` lifecycle, with verification, retry, and
//! budget bookkeeping. The serde shape of this struct doubles as the
//! snapshot-line format of the event log, so journal entries, dependency
//! ids, and claim records are embedded (and default to empty when a record
//! comes from the relational store without them loaded).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::id::TaskId;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Workflow status of a task.
///
/// `done` and `archived` are terminal for normal flow. `failed` is terminal
/// only once retries are exhausted; before that the task is rewound to
/// `open` with a future `retry_after`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Not started; dispatchable once dependencies complete.
    #[default]
    Open,
    /// Work in progress.
    Wip,
    /// Explicitly parked behind something outside the dependency graph.
    Blocked,
    /// Awaiting human review (also where a blocked close lands).
    Review,
    /// Completed.
    Done,
    /// Completed and filed away.
    Archived,
    /// Gave up after exhausting retries.
    Failed,
}

impl Status {
    /// All statuses, in lifecycle order. Used for CLI validation messages.
    pub const ALL: [Self; 7] = [
        Self::Open,
        Self::Wip,
        Self::Blocked,
        Self::Review,
        Self::Done,
        Self::Archived,
        Self::Failed,
    ];

    /// True for statuses that satisfy a dependency edge.
    #[must_use]
    pub const fn is_complete(self) -> bool {
        matches!(self, Self::Done | Self::Archived)
    }

    /// Stable lowercase name (matches the serde representation).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Wip => "wip",
            Self::Blocked => "blocked",
            Self::Review => "review",
            Self::Done => "done",
            Self::Archived => "archived",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "wip" => Ok(Self::Wip),
            "blocked" => Ok(Self::Blocked),
            "review" => Ok(Self::Review),
            "done" => Ok(Self::Done),
            "archived" => Ok(Self::Archived),
            "failed" => Ok(Self::Failed),
            other => Err(format!(
                "unknown status '{other}' (expected one of: open, wip, blocked, review, done, archived, failed)"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Autonomy
// ---------------------------------------------------------------------------

/// How much human mediation a task needs before and after dispatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Autonomy {
    /// Never auto-runs.
    #[default]
    Manual,
    /// May be dispatched by the orchestrator.
    Auto,
    /// Produces output then pauses for review.
    Review,
    /// Requires approval before dispatch.
    Approve,
}

impl Autonomy {
    /// Stable lowercase name (matches the serde representation).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
            Self::Review => "review",
            Self::Approve => "approve",
        }
    }
}

impl fmt::Display for Autonomy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Autonomy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "auto" => Ok(Self::Auto),
            "review" => Ok(Self::Review),
            "approve" => Ok(Self::Approve),
            other => Err(format!(
                "unknown autonomy '{other}' (expected one of: manual, auto, review, approve)"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// VerificationStatus
// ---------------------------------------------------------------------------

/// Outcome of the most recent verification pass, if any.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// No verification recorded.
    #[default]
    Unset,
    /// Verified; the close gate passes without further checks.
    Passed,
    /// Verification ran and failed.
    Failed,
    /// A verifier asked for changes.
    ChangesRequested,
}

impl VerificationStatus {
    /// Stable snake_case name (matches the serde representation).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::ChangesRequested => "changes_requested",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unset" => Ok(Self::Unset),
            "passed" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            "changes_requested" => Ok(Self::ChangesRequested),
            other => Err(format!("unknown verification status '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// JournalEntry
// ---------------------------------------------------------------------------

/// One immutable, append-only annotation on a task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// When the entry was written (`YYYY-MM-DD HH:MM:SS`, UTC).
    pub timestamp: String,
    /// The entry text.
    pub entry: String,
    /// Who wrote it (`human`, `system`, or an agent label).
    pub author: String,
}

impl JournalEntry {
    /// Author label used for engine-generated entries (status changes,
    /// gate results, budget notices). Verification checks skip these.
    pub const SYSTEM_AUTHOR: &'static str = "system";

    /// True if this entry was written by the engine rather than a person
    /// or agent.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.author == Self::SYSTEM_AUTHOR
    }
}

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

/// Lifecycle of a soft claim.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    /// Reservation is active.
    #[default]
    Claimed,
    /// Reservation was released.
    Released,
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Claimed => f.write_str("claimed"),
            Self::Released => f.write_str("released"),
        }
    }
}

/// A soft reservation of a task by an agent.
///
/// Advisory only — orchestration decisions key off `status = wip` plus
/// workspace locks, never off claims. A task has at most one active claim;
/// conflicting attempts warn and leave the existing claim in place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    /// The claiming agent's label.
    pub agent: String,
    /// Model the agent intends to use, when known.
    #[serde(default)]
    pub model: Option<String>,
    /// Whether the claim is active or released.
    #[serde(default)]
    pub status: ClaimStatus,
    /// When the claim was made.
    pub claimed_at: String,
    /// When the claim was released, if it was.
    #[serde(default)]
    pub released_at: Option<String>,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// The primary entity: one unit of work.
///
/// Serialization note: this struct is also the snapshot-line shape of the
/// event log, so every field defaults when absent and the `journal`, `deps`,
/// and `claims` collections are embedded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Opaque id, `trak-` + six lowercase hex characters.
    pub id: TaskId,
    /// Short human title.
    #[serde(default)]
    pub title: String,
    /// Longer free-form description.
    #[serde(default)]
    pub description: String,
    /// Workflow status.
    #[serde(default)]
    pub status: Status,
    /// 0–3, where 0 is highest.
    #[serde(default = "default_priority")]
    pub priority: i64,
    /// Free-form grouping string.
    #[serde(default)]
    pub project: Option<String>,
    /// Free-form note about what blocks this task (distinct from the
    /// dependency edges in `deps`).
    #[serde(default)]
    pub blocked_by: Option<String>,
    /// Parent task id, for subtasks.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Epic this task rolls up into.
    #[serde(default)]
    pub epic_id: Option<String>,
    /// True if this task aggregates others via their `epic_id`.
    #[serde(default)]
    pub is_epic: bool,
    /// Creation timestamp (`YYYY-MM-DD HH:MM:SS`, UTC).
    #[serde(default)]
    pub created_at: String,
    /// Last-mutation timestamp; the merge resolver's tie-breaker.
    #[serde(default)]
    pub updated_at: String,
    /// Label of the agent session that touched this task last.
    #[serde(default)]
    pub agent_session: Option<String>,
    /// Cumulative token count (legacy single counter).
    #[serde(default)]
    pub tokens_used: i64,
    /// Cumulative spend in USD.
    #[serde(default)]
    pub cost_usd: f64,
    /// Comma-joined tag set.
    #[serde(default)]
    pub tags: String,
    /// Assigned agent, if any.
    #[serde(default)]
    pub assigned_to: Option<String>,
    /// Who verified the task, if anyone.
    #[serde(default)]
    pub verified_by: Option<String>,
    /// Outcome of the most recent verification.
    #[serde(default)]
    pub verification_status: VerificationStatus,
    /// Provenance string (e.g. `cli`, `decompose`, an importing tool).
    #[serde(default)]
    pub created_from: Option<String>,
    /// Shell command the close gate runs as a hard check.
    #[serde(default)]
    pub verify_command: Option<String>,
    /// Git HEAD captured when the task entered `wip`; baseline for
    /// git-based proof of work.
    #[serde(default)]
    pub wip_snapshot: Option<String>,
    /// Dispatch policy.
    #[serde(default)]
    pub autonomy: Autonomy,
    /// USD ceiling; unset or ≤ 0 means no budget.
    #[serde(default)]
    pub budget_usd: Option<f64>,
    /// Cumulative input tokens.
    #[serde(default)]
    pub tokens_in: i64,
    /// Cumulative output tokens.
    #[serde(default)]
    pub tokens_out: i64,
    /// Last model that billed against this task.
    #[serde(default)]
    pub model_used: Option<String>,
    /// Cumulative wall-clock seconds across priced operations.
    #[serde(default)]
    pub duration_seconds: f64,
    /// Failed attempts so far.
    #[serde(default)]
    pub retry_count: i64,
    /// Attempt ceiling; 0 disables retry.
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,
    /// Reason given for the most recent failure.
    #[serde(default)]
    pub last_failure_reason: Option<String>,
    /// Earliest timestamp at which a rewound task may run again.
    #[serde(default)]
    pub retry_after: Option<String>,
    /// Per-task dispatch timeout override, in seconds.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Journal entries, oldest first (embedded in snapshot lines).
    #[serde(default)]
    pub journal: Vec<JournalEntry>,
    /// Ids of tasks this one depends on (embedded in snapshot lines).
    #[serde(default)]
    pub deps: Vec<String>,
    /// Claim history, oldest first (embedded in snapshot lines).
    #[serde(default)]
    pub claims: Vec<ClaimRecord>,
}

const fn default_priority() -> i64 {
    1
}

const fn default_max_retries() -> i64 {
    3
}

impl Task {
    /// A fresh task with defaults applied, created and updated `now`.
    #[must_use]
    pub fn new(id: TaskId, title: &str, now: &str) -> Self {
        Self {
            id,
            title: title.to_owned(),
            description: String::new(),
            status: Status::Open,
            priority: default_priority(),
            project: None,
            blocked_by: None,
            parent_id: None,
            epic_id: None,
            is_epic: false,
            created_at: now.to_owned(),
            updated_at: now.to_owned(),
            agent_session: None,
            tokens_used: 0,
            cost_usd: 0.0,
            tags: String::new(),
            assigned_to: None,
            verified_by: None,
            verification_status: VerificationStatus::Unset,
            created_from: None,
            verify_command: None,
            wip_snapshot: None,
            autonomy: Autonomy::Manual,
            budget_usd: None,
            tokens_in: 0,
            tokens_out: 0,
            model_used: None,
            duration_seconds: 0.0,
            retry_count: 0,
            max_retries: default_max_retries(),
            last_failure_reason: None,
            retry_after: None,
            timeout_seconds: None,
            journal: Vec::new(),
            deps: Vec::new(),
            claims: Vec::new(),
        }
    }

    /// Tags as a list (splits the comma-joined set, dropping empties).
    #[must_use]
    pub fn tag_list(&self) -> Vec<&str> {
        self.tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// The active claim, if one exists.
    #[must_use]
    pub fn active_claim(&self) -> Option<&ClaimRecord> {
        self.claims
            .iter()
            .find(|c| c.status == ClaimStatus::Claimed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_id() -> TaskId {
        TaskId::new("trak-abc123").expect("valid id")
    }

    #[test]
    fn new_task_defaults() {
        let t = Task::new(sample_id(), "Write docs", "2026-08-01 10:00:00");
        assert_eq!(t.status, Status::Open);
        assert_eq!(t.priority, 1);
        assert_eq!(t.autonomy, Autonomy::Manual);
        assert_eq!(t.max_retries, 3);
        assert_eq!(t.retry_count, 0);
        assert_eq!(t.created_at, t.updated_at);
        assert!(t.journal.is_empty());
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in Status::ALL {
            assert_eq!(s.as_str().parse::<Status>(), Ok(s));
        }
    }

    #[test]
    fn status_completeness() {
        assert!(Status::Done.is_complete());
        assert!(Status::Archived.is_complete());
        assert!(!Status::Open.is_complete());
        assert!(!Status::Failed.is_complete());
    }

    #[test]
    fn unknown_status_is_an_error() {
        assert!("cancelled".parse::<Status>().is_err());
    }

    #[test]
    fn autonomy_parses() {
        assert_eq!("auto".parse::<Autonomy>(), Ok(Autonomy::Auto));
        assert!("autopilot".parse::<Autonomy>().is_err());
    }

    #[test]
    fn tag_list_splits_and_trims() {
        let mut t = Task::new(sample_id(), "t", "2026-08-01 10:00:00");
        t.tags = "db, cli,,urgent".to_owned();
        assert_eq!(t.tag_list(), vec!["db", "cli", "urgent"]);
    }

    #[test]
    fn snapshot_deserializes_with_missing_fields() {
        // Minimal snapshot line: everything except id may be absent.
        let t: Task = serde_json::from_str(r#"{"id":"trak-0000aa"}"#).expect("deserialize");
        assert_eq!(t.status, Status::Open);
        assert_eq!(t.priority, 1);
        assert_eq!(t.max_retries, 3);
        assert!(t.deps.is_empty());
    }

    #[test]
    fn snapshot_round_trip_preserves_collections() {
        let mut t = Task::new(sample_id(), "t", "2026-08-01 10:00:00");
        t.journal.push(JournalEntry {
            timestamp: "2026-08-01 10:01:00".to_owned(),
            entry: "did work".to_owned(),
            author: "human".to_owned(),
        });
        t.deps.push("trak-ffffff".to_owned());
        t.claims.push(ClaimRecord {
            agent: "codex-1".to_owned(),
            model: Some("claude-opus-4-5".to_owned()),
            status: ClaimStatus::Claimed,
            claimed_at: "2026-08-01 10:02:00".to_owned(),
            released_at: None,
        });
        let line = serde_json::to_string(&t).expect("serialize");
        let back: Task = serde_json::from_str(&line).expect("deserialize");
        assert_eq!(back, t);
    }

    #[test]
    fn active_claim_skips_released() {
        let mut t = Task::new(sample_id(), "t", "2026-08-01 10:00:00");
        t.claims.push(ClaimRecord {
            agent: "a".to_owned(),
            model: None,
            status: ClaimStatus::Released,
            claimed_at: "2026-08-01 10:00:00".to_owned(),
            released_at: Some("2026-08-01 10:05:00".to_owned()),
        });
        assert!(t.active_claim().is_none());
        t.claims.push(ClaimRecord {
            agent: "b".to_owned(),
            model: None,
            status: ClaimStatus::Claimed,
            claimed_at: "2026-08-01 10:06:00".to_owned(),
            released_at: None,
        });
        assert_eq!(t.active_claim().map(|c| c.agent.as_str()), Some("b"));
    }
}
