//! Cost engine: pricing lookup, cost events, budget status.
//!
//! Pricing is a static table of USD-per-million-token rates keyed by
//! canonical model name. Matching is forgiving — exact first, then
//! case-insensitive substring in either direction, so
//! `anthropic/claude-opus-4-5` finds `claude-opus-4-5`. Unknown models
//! price at zero rather than erroring.
//!
//! Recording a cost event atomically bumps the parent task's cumulative
//! counters and re-evaluates its budget; crossing the 80% line or the
//! ceiling leaves a one-time journal notice.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::clock;
use crate::error::{Result, TrakError};
use crate::eventlog::{Event, EventLog, EventOp};
use crate::model::{JournalEntry, Task};
use crate::store::Store;

/// Budget fraction at which the warning notice fires.
const WARNING_THRESHOLD: f64 = 0.8;

// ---------------------------------------------------------------------------
// Pricing table
// ---------------------------------------------------------------------------

/// One pricing row: USD per million tokens.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelPrice {
    /// Canonical model name.
    pub name: &'static str,
    /// Input rate, USD per million tokens.
    pub input_per_million: f64,
    /// Output rate, USD per million tokens.
    pub output_per_million: f64,
    /// Cache-read rate, when the provider prices it separately.
    pub cache_per_million: Option<f64>,
}

/// Static pricing, refreshed by hand when providers change rates.
pub const PRICING: &[ModelPrice] = &[
    ModelPrice { name: "claude-opus-4-5", input_per_million: 5.0, output_per_million: 25.0, cache_per_million: Some(0.5) },
    ModelPrice { name: "claude-opus-4-1", input_per_million: 15.0, output_per_million: 75.0, cache_per_million: Some(1.5) },
    ModelPrice { name: "claude-sonnet-4-5", input_per_million: 3.0, output_per_million: 15.0, cache_per_million: Some(0.3) },
    ModelPrice { name: "claude-haiku-4-5", input_per_million: 1.0, output_per_million: 5.0, cache_per_million: Some(0.1) },
    ModelPrice { name: "gpt-5.2", input_per_million: 1.25, output_per_million: 10.0, cache_per_million: Some(0.125) },
    ModelPrice { name: "gpt-5-mini", input_per_million: 0.25, output_per_million: 2.0, cache_per_million: None },
    ModelPrice { name: "gpt-4.1", input_per_million: 2.0, output_per_million: 8.0, cache_per_million: None },
    ModelPrice { name: "gemini-3-pro", input_per_million: 2.0, output_per_million: 12.0, cache_per_million: None },
    ModelPrice { name: "gemini-3-flash", input_per_million: 0.3, output_per_million: 2.5, cache_per_million: None },
];

/// Find the price row for a model string, forgivingly.
#[must_use]
pub fn lookup(model: &str) -> Option<&'static ModelPrice> {
    let needle = model.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    if let Some(exact) = PRICING.iter().find(|p| p.name == needle) {
        return Some(exact);
    }
    // Symmetric substring match: a short price key can match a longer
    // provider-prefixed string and vice versa.
    PRICING
        .iter()
        .find(|p| needle.contains(p.name) || p.name.contains(needle.as_str()))
}

/// Price a token count against a model; zero for unknown models.
#[must_use]
pub fn calculate(tokens_in: i64, tokens_out: i64, model: &str) -> f64 {
    lookup(model).map_or(0.0, |p| {
        let tin = tokens_in.max(0) as f64;
        let tout = tokens_out.max(0) as f64;
        tin / 1e6 * p.input_per_million + tout / 1e6 * p.output_per_million
    })
}

// ---------------------------------------------------------------------------
// CostEvent
// ---------------------------------------------------------------------------

/// A granular record of one priced operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostEvent {
    /// The task billed.
    pub task_id: String,
    /// When the operation finished.
    pub timestamp: String,
    /// Model used, if known.
    pub model: Option<String>,
    /// Input tokens consumed.
    pub tokens_in: i64,
    /// Output tokens produced.
    pub tokens_out: i64,
    /// USD cost (pre-computed by the caller or via [`calculate`]).
    pub cost_usd: f64,
    /// Wall-clock seconds.
    pub duration_seconds: f64,
    /// The agent that did the work.
    pub agent: Option<String>,
    /// Operation kind (`close`, `log`, `run`, ...).
    pub operation: Option<String>,
    /// Free-form JSON metadata.
    pub metadata: Option<String>,
}

// ---------------------------------------------------------------------------
// Budget status
// ---------------------------------------------------------------------------

/// Where a task stands against its budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BudgetState {
    /// No (or non-positive) budget configured.
    NoBudget,
    /// Spend below the warning line.
    Ok,
    /// Spend at or past 80% of the budget.
    Warning,
    /// Spend at or past the budget.
    Exceeded,
}

impl std::fmt::Display for BudgetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoBudget => f.write_str("no-budget"),
            Self::Ok => f.write_str("ok"),
            Self::Warning => f.write_str("warning"),
            Self::Exceeded => f.write_str("exceeded"),
        }
    }
}

/// Snapshot of a task's budget position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BudgetStatus {
    /// The classification.
    pub state: BudgetState,
    /// Cumulative spend.
    pub spent: f64,
    /// Configured ceiling, when there is one.
    pub budget: Option<f64>,
}

/// Classify a task's spend against its budget.
#[must_use]
pub fn budget_status(task: &Task) -> BudgetStatus {
    let spent = task.cost_usd;
    match task.budget_usd {
        None => BudgetStatus { state: BudgetState::NoBudget, spent, budget: None },
        Some(budget) if budget <= 0.0 => {
            BudgetStatus { state: BudgetState::NoBudget, spent, budget: None }
        }
        Some(budget) => {
            let state = if spent >= budget {
                BudgetState::Exceeded
            } else if spent / budget >= WARNING_THRESHOLD {
                BudgetState::Warning
            } else {
                BudgetState::Ok
            };
            BudgetStatus { state, spent, budget: Some(budget) }
        }
    }
}

/// False iff the task's budget is exhausted. The orchestrator consults
/// this before dispatch.
#[must_use]
pub fn is_budget_available(task: &Task) -> bool {
    budget_status(task).state != BudgetState::Exceeded
}

// ---------------------------------------------------------------------------
// CostEngine
// ---------------------------------------------------------------------------

/// Records cost events against the store and event log.
pub struct CostEngine<'a> {
    store: &'a Store,
    log: &'a EventLog,
}

impl<'a> CostEngine<'a> {
    /// Bind to an open store and event log.
    #[must_use]
    pub const fn new(store: &'a Store, log: &'a EventLog) -> Self {
        Self { store, log }
    }

    /// Record one cost event: insert the row, bump the task's aggregates,
    /// and re-check the budget — all in one transaction. Returns the
    /// updated task and its budget status.
    ///
    /// # Errors
    /// [`TrakError::NotFound`] for an unknown task; store failures.
    pub fn record(&self, event: &CostEvent) -> Result<(Task, BudgetStatus)> {
        let mut task = self
            .store
            .get_task(&event.task_id)?
            .ok_or_else(|| TrakError::task_not_found(&event.task_id))?;

        let before = budget_status(&task);

        let tx = self.store.begin()?;
        self.store.insert_cost_event(event)?;

        task.cost_usd += event.cost_usd;
        task.tokens_in += event.tokens_in;
        task.tokens_out += event.tokens_out;
        task.tokens_used += event.tokens_in + event.tokens_out;
        task.duration_seconds += event.duration_seconds;
        if let Some(model) = &event.model {
            task.model_used = Some(model.clone());
        }
        task.updated_at = clock::now();
        self.store.update_task(&task)?;

        let after = budget_status(&task);
        if let Some(notice) = budget_notice(before, after) {
            let entry = JournalEntry {
                timestamp: task.updated_at.clone(),
                entry: notice,
                author: JournalEntry::SYSTEM_AUTHOR.to_owned(),
            };
            self.store
                .append_journal(task.id.as_str(), &entry.timestamp, &entry.entry, &entry.author)?;
        }
        tx.commit()?;

        // Best-effort durable record of the aggregate change.
        let data = json!({
            "cost_usd": task.cost_usd,
            "tokens_in": task.tokens_in,
            "tokens_out": task.tokens_out,
            "tokens_used": task.tokens_used,
            "duration_seconds": task.duration_seconds,
            "model_used": task.model_used,
        });
        let ev = Event::new(EventOp::Update, task.id.as_str(), &task.updated_at, data);
        if let Err(e) = self.log.append(&ev) {
            warn!(error = %e, "event log append failed after cost record");
        }

        Ok((task, after))
    }
}

/// The journal notice for a budget transition, if this one deserves one.
/// Both notices are transition-edged, so each fires once per crossing.
fn budget_notice(before: BudgetStatus, after: BudgetStatus) -> Option<String> {
    let budget = after.budget?;
    match (before.state, after.state) {
        (s, BudgetState::Exceeded) if s != BudgetState::Exceeded => Some(format!(
            "Budget exceeded: ${:.2} of ${:.2}",
            after.spent, budget
        )),
        (s, BudgetState::Warning) if s != BudgetState::Warning && s != BudgetState::Exceeded => {
            Some(format!(
                "Budget warning: ${:.2} of ${:.2} ({}%)",
                after.spent,
                budget,
                (after.spent / budget * 100.0).round()
            ))
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskId;

    fn fixture() -> (Store, EventLog, tempfile::TempDir) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = Store::open_in_memory().expect("store");
        let log = EventLog::new(tmp.path().join("trak.jsonl"));
        (store, log, tmp)
    }

    fn seed(store: &Store, budget: Option<f64>) -> Task {
        let mut t = Task::new(
            TaskId::new("trak-0000aa").expect("id"),
            "budgeted",
            &clock::now(),
        );
        t.budget_usd = budget;
        store.insert_task(&t).expect("insert");
        t
    }

    fn event(cost: f64) -> CostEvent {
        CostEvent {
            task_id: "trak-0000aa".to_owned(),
            timestamp: clock::now(),
            model: Some("claude-opus-4-5".to_owned()),
            tokens_in: 1000,
            tokens_out: 500,
            cost_usd: cost,
            duration_seconds: 10.0,
            agent: Some("codex-1".to_owned()),
            operation: Some("run".to_owned()),
            metadata: None,
        }
    }

    #[test]
    fn lookup_exact_and_substring_both_ways() {
        assert_eq!(lookup("claude-opus-4-5").map(|p| p.name), Some("claude-opus-4-5"));
        assert_eq!(
            lookup("anthropic/claude-opus-4-5").map(|p| p.name),
            Some("claude-opus-4-5")
        );
        assert_eq!(lookup("CLAUDE-HAIKU-4-5").map(|p| p.name), Some("claude-haiku-4-5"));
        // Short needle matching a longer key.
        assert_eq!(lookup("gpt-5-mini").map(|p| p.name), Some("gpt-5-mini"));
        assert!(lookup("totally-unknown-model").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn calculate_prices_per_million() {
        // 1M in + 1M out of opus: 5 + 25.
        let c = calculate(1_000_000, 1_000_000, "claude-opus-4-5");
        assert!((c - 30.0).abs() < 1e-9);
        // Unknown models are free (and silent).
        assert!(calculate(1_000_000, 1_000_000, "mystery").abs() < f64::EPSILON);
    }

    #[test]
    fn budget_states() {
        let (store, _log, _tmp) = fixture();
        let mut t = seed(&store, Some(1.0));
        assert_eq!(budget_status(&t).state, BudgetState::Ok);
        t.cost_usd = 0.8;
        assert_eq!(budget_status(&t).state, BudgetState::Warning);
        t.cost_usd = 1.0;
        assert_eq!(budget_status(&t).state, BudgetState::Exceeded);
        t.budget_usd = None;
        assert_eq!(budget_status(&t).state, BudgetState::NoBudget);
        t.budget_usd = Some(0.0);
        assert_eq!(budget_status(&t).state, BudgetState::NoBudget);
    }

    #[test]
    fn record_bumps_aggregates_exactly() {
        let (store, log, _tmp) = fixture();
        seed(&store, None);
        let engine = CostEngine::new(&store, &log);

        let (task, status) = engine.record(&event(0.25)).expect("record");
        assert!((task.cost_usd - 0.25).abs() < 1e-9);
        assert_eq!(task.tokens_in, 1000);
        assert_eq!(task.tokens_out, 500);
        assert_eq!(task.tokens_used, 1500);
        assert!((task.duration_seconds - 10.0).abs() < 1e-9);
        assert_eq!(task.model_used.as_deref(), Some("claude-opus-4-5"));
        assert_eq!(status.state, BudgetState::NoBudget);

        let (task, _) = engine.record(&event(0.25)).expect("record again");
        assert!((task.cost_usd - 0.5).abs() < 1e-9);
        assert_eq!(task.tokens_used, 3000);
        assert_eq!(store.cost_events_for("trak-0000aa").expect("events").len(), 2);
    }

    #[test]
    fn warning_notice_fires_once() {
        let (store, log, _tmp) = fixture();
        seed(&store, Some(1.0));
        let engine = CostEngine::new(&store, &log);

        let (_, s1) = engine.record(&event(0.85)).expect("record");
        assert_eq!(s1.state, BudgetState::Warning);
        let (_, s2) = engine.record(&event(0.05)).expect("record");
        assert_eq!(s2.state, BudgetState::Warning);

        let journal = store.journal_for("trak-0000aa").expect("journal");
        let warnings: Vec<_> = journal
            .iter()
            .filter(|e| e.entry.contains("Budget warning"))
            .collect();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn exceeded_notice_on_crossing() {
        let (store, log, _tmp) = fixture();
        seed(&store, Some(1.0));
        let engine = CostEngine::new(&store, &log);

        engine.record(&event(0.9)).expect("record");
        let (task, status) = engine.record(&event(0.6)).expect("record");
        assert_eq!(status.state, BudgetState::Exceeded);
        assert!(!is_budget_available(&task));

        let journal = store.journal_for("trak-0000aa").expect("journal");
        let exceeded: Vec<_> = journal
            .iter()
            .filter(|e| e.entry.contains("Budget exceeded"))
            .collect();
        assert_eq!(exceeded.len(), 1);

        // Further spend while already exceeded stays quiet.
        engine.record(&event(0.1)).expect("record");
        let journal = store.journal_for("trak-0000aa").expect("journal");
        assert_eq!(
            journal.iter().filter(|e| e.entry.contains("Budget exceeded")).count(),
            1
        );
    }

    #[test]
    fn first_event_can_jump_straight_to_exceeded() {
        let (store, log, _tmp) = fixture();
        seed(&store, Some(1.0));
        let engine = CostEngine::new(&store, &log);
        let (_, status) = engine.record(&event(1.5)).expect("record");
        assert_eq!(status.state, BudgetState::Exceeded);
        let journal = store.journal_for("trak-0000aa").expect("journal");
        assert!(journal.iter().any(|e| e.entry.contains("Budget exceeded")));
    }

    #[test]
    fn record_unknown_task_is_not_found() {
        let (store, log, _tmp) = fixture();
        let engine = CostEngine::new(&store, &log);
        assert!(matches!(
            engine.record(&event(0.1)),
            Err(TrakError::NotFound { .. })
        ));
    }

    #[test]
    fn record_appends_update_event() {
        let (store, log, _tmp) = fixture();
        seed(&store, None);
        CostEngine::new(&store, &log).record(&event(0.1)).expect("record");
        let raw = log.read_raw().expect("read");
        assert!(raw.contains("\"op\":\"update\""));
        assert!(raw.contains("\"tokens_used\":1500"));
    }
}
