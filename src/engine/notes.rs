//! Journal entries and soft claims.

use serde_json::json;

use crate::clock;
use crate::error::Result;
use crate::eventlog::{Event, EventOp};
use crate::model::{ClaimRecord, ClaimStatus, Task};

use super::close::CostAdditions;
use super::TaskEngine;

/// Environment variable supplying the default author/agent label.
pub const ENV_AGENT: &str = "TRAK_AGENT";

/// Options for [`TaskEngine::add_log`].
#[derive(Clone, Debug, Default)]
pub struct LogOptions {
    /// Entry author; falls back to `TRAK_AGENT`, then `human`.
    pub author: Option<String>,
    /// Cost/token/duration to accumulate alongside the entry.
    pub cost: CostAdditions,
}

/// What a claim attempt did.
#[derive(Clone, Debug)]
pub enum ClaimOutcome {
    /// Claim recorded.
    Claimed(Task),
    /// Someone already holds an active claim; nothing was overwritten.
    AlreadyClaimed {
        /// The task as found.
        task: Task,
        /// The holder's agent label.
        holder: String,
    },
}

impl TaskEngine {
    /// Append a journal entry, optionally recording cost against the task.
    ///
    /// Cost additions go through the cost engine: a `CostEvent` row, the
    /// aggregate bumps, and the budget check all happen as one recording.
    /// A missing `--cost` with tokens and a model present is priced from
    /// the pricing table (zero for unknown models).
    ///
    /// # Errors
    /// [`crate::error::TrakError::NotFound`] and store failures.
    pub fn add_log(&self, needle: &str, entry: &str, opts: &LogOptions) -> Result<Task> {
        let mut task = self.resolve(needle)?;
        let now = clock::now();
        let author = opts
            .author
            .clone()
            .or_else(|| std::env::var(ENV_AGENT).ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| "human".to_owned());

        self.store().append_journal(task.id.as_str(), &now, entry, &author)?;
        self.emit(&Event::new(
            EventOp::Log,
            task.id.as_str(),
            &now,
            json!({"entry": entry, "author": author}),
        ));

        if !opts.cost.is_empty() {
            let tokens_in = opts.cost.tokens_in.unwrap_or(0);
            let tokens_out = opts.cost.tokens_out.unwrap_or(0);
            let cost_usd = opts.cost.cost_usd.unwrap_or_else(|| {
                opts.cost
                    .model
                    .as_deref()
                    .map_or(0.0, |m| crate::cost::calculate(tokens_in, tokens_out, m))
            });
            let (updated, _) = self.cost().record(&crate::cost::CostEvent {
                task_id: task.id.as_str().to_owned(),
                timestamp: now,
                model: opts.cost.model.clone(),
                tokens_in,
                tokens_out,
                cost_usd,
                duration_seconds: opts.cost.duration_seconds.unwrap_or(0.0),
                agent: Some(author),
                operation: Some("log".to_owned()),
                metadata: None,
            })?;
            task = updated;
        }

        self.autocommit(&format!("trak: log {}", task.id));
        task.journal = self.store().journal_for(task.id.as_str())?;
        Ok(task)
    }

    /// Record a soft claim. A task has at most one active claim;
    /// a conflicting attempt warns and leaves the existing claim alone.
    ///
    /// # Errors
    /// [`crate::error::TrakError::NotFound`] and store failures.
    pub fn claim(&self, needle: &str, agent: &str, model: Option<&str>) -> Result<ClaimOutcome> {
        let task = self.resolve(needle)?;
        if let Some(active) = task.active_claim() {
            let holder = active.agent.clone();
            if holder != agent {
                return Ok(ClaimOutcome::AlreadyClaimed { task, holder });
            }
            // Same agent re-claiming is a quiet no-op.
            return Ok(ClaimOutcome::Claimed(task));
        }

        let now = clock::now();
        let record = ClaimRecord {
            agent: agent.to_owned(),
            model: model.map(str::to_owned),
            status: ClaimStatus::Claimed,
            claimed_at: now.clone(),
            released_at: None,
        };
        let tx = self.store().begin()?;
        self.store().insert_claim(task.id.as_str(), &record)?;
        self.system_journal(task.id.as_str(), &now, &format!("Claimed by {agent}"))?;
        tx.commit()?;

        self.emit(&Event::new(
            EventOp::Claim,
            task.id.as_str(),
            &now,
            json!({
                "agent": agent,
                "model": model,
                "status": "claimed",
                "claimed_at": now,
            }),
        ));
        self.autocommit(&format!("trak: claim {}", task.id));

        let task = self.resolve(task.id.as_str())?;
        Ok(ClaimOutcome::Claimed(task))
    }

    /// Release an agent's active claim. Returns `false` when there was
    /// nothing to release.
    ///
    /// # Errors
    /// [`crate::error::TrakError::NotFound`] and store failures.
    pub fn release_claim(&self, needle: &str, agent: &str) -> Result<bool> {
        let task = self.resolve(needle)?;
        let now = clock::now();

        let tx = self.store().begin()?;
        let released = self.store().release_claim(task.id.as_str(), agent, &now)?;
        if released {
            self.system_journal(task.id.as_str(), &now, &format!("Released by {agent}"))?;
        }
        tx.commit()?;

        if released {
            self.emit(&Event::new(
                EventOp::Claim,
                task.id.as_str(),
                &now,
                json!({
                    "agent": agent,
                    "status": "released",
                    "released_at": now,
                }),
            ));
            self.autocommit(&format!("trak: release {}", task.id));
        }
        Ok(released)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
