//! The close operation and its verification gate.
//!
//! A close succeeds only through one of three doors: a prior recorded
//! `verification_status = passed`, an explicit `--force` override, or a
//! `--verify` run that clears the gate. The gate has hard checks (any
//! failure blocks: the task's `verify_command` must exit zero, a supplied
//! commit hash must exist) and soft checks (at least one must pass:
//! journal activity since entering wip, git commits since the wip
//! snapshot, or a supplied proof artifact). A blocked close parks the task
//! in `review` and exits non-zero so automation notices.

use std::process::Command;

use serde_json::json;

use crate::clock;
use crate::error::Result;
use crate::eventlog::{Event, EventOp};
use crate::gitsync;
use crate::graph;
use crate::model::{Autonomy, Status, Task};

use super::TaskEngine;

// ---------------------------------------------------------------------------
// Options & outcomes
// ---------------------------------------------------------------------------

/// Cost/token/duration additions carried by `close` and `log`.
#[derive(Clone, Debug, Default)]
pub struct CostAdditions {
    /// USD to add.
    pub cost_usd: Option<f64>,
    /// Input tokens to add.
    pub tokens_in: Option<i64>,
    /// Output tokens to add.
    pub tokens_out: Option<i64>,
    /// Model that did the work.
    pub model: Option<String>,
    /// Wall-clock seconds to add.
    pub duration_seconds: Option<f64>,
}

impl CostAdditions {
    /// True when nothing would change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cost_usd.is_none()
            && self.tokens_in.is_none()
            && self.tokens_out.is_none()
            && self.model.is_none()
            && self.duration_seconds.is_none()
    }

    /// Fold the additions into a task's accumulators.
    pub fn apply(&self, task: &mut Task) {
        if let Some(c) = self.cost_usd {
            task.cost_usd += c;
        }
        if let Some(t) = self.tokens_in {
            task.tokens_in += t;
            task.tokens_used += t;
        }
        if let Some(t) = self.tokens_out {
            task.tokens_out += t;
            task.tokens_used += t;
        }
        if let Some(model) = &self.model {
            task.model_used = Some(model.clone());
        }
        if let Some(d) = self.duration_seconds {
            task.duration_seconds += d;
        }
    }
}

/// Flags accepted by the close operation.
#[derive(Clone, Debug, Default)]
pub struct CloseOptions {
    /// Run the verification gate.
    pub verify: bool,
    /// Human override: close without verification.
    pub force: bool,
    /// Proof artifact (URL, file path, free text) for the gate.
    pub proof: Option<String>,
    /// Commit hash that must exist in the repo.
    pub commit: Option<String>,
    /// Agent identity for `verified_by`.
    pub verifier: Option<String>,
    /// Cost additions applied on a successful close.
    pub cost: CostAdditions,
}

/// One verification check and how it went.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckResult {
    /// Check name (`verify-command`, `commit`, `journal-activity`,
    /// `git-proof`, `proof-artifact`).
    pub name: &'static str,
    /// Whether it passed.
    pub passed: bool,
    /// Human-readable outcome.
    pub detail: String,
    /// Hard checks block on failure; soft checks only need one pass.
    pub hard: bool,
}

/// What the close operation did.
#[derive(Clone, Debug)]
pub enum CloseOutcome {
    /// The task was already `done`; nothing changed.
    AlreadyDone(Task),
    /// Closed; includes tasks that just became dispatchable.
    Closed {
        /// The task, post-close.
        task: Task,
        /// Gate checks that ran (empty for pre-passed/forced closes).
        checks: Vec<CheckResult>,
        /// `autonomy = auto` tasks whose parents are now all complete.
        unblocked: Vec<Task>,
    },
    /// The gate blocked the close; the task is now in `review`.
    Blocked {
        /// The task, post-transition.
        task: Task,
        /// Why the gate refused.
        reason: String,
        /// Gate checks that ran.
        checks: Vec<CheckResult>,
    },
}

// ---------------------------------------------------------------------------
// Close
// ---------------------------------------------------------------------------

impl TaskEngine {
    /// Close a task through the verification gate.
    ///
    /// # Errors
    /// [`crate::error::TrakError::NotFound`] and store failures. A blocked
    /// gate is a [`CloseOutcome::Blocked`], not an error.
    pub fn close(&self, needle: &str, opts: &CloseOptions) -> Result<CloseOutcome> {
        let task = self.resolve(needle)?;
        if task.status == Status::Done {
            return Ok(CloseOutcome::AlreadyDone(task));
        }

        if task.verification_status == crate::model::VerificationStatus::Passed {
            return self.finish_close(task, opts, Vec::new(), None);
        }
        if opts.force {
            return self.finish_close(task, opts, Vec::new(), Some("[force] human override"));
        }
        if opts.verify {
            let checks = self.run_gate(&task, opts);
            let now = clock::now();
            for check in &checks {
                let verdict = if check.passed { "pass" } else { "fail" };
                self.system_journal(
                    task.id.as_str(),
                    &now,
                    &format!("Verification {}: {verdict} — {}", check.name, check.detail),
                )?;
            }
            let hard_failed = checks.iter().any(|c| c.hard && !c.passed);
            let soft_passed = checks.iter().any(|c| !c.hard && c.passed);
            if hard_failed {
                return self.block_close(task, "hard check failed", checks);
            }
            if !soft_passed {
                return self.block_close(task, "no proof of work", checks);
            }
            return self.finish_close(task, opts, checks, None);
        }

        self.block_close(task, "no verification", Vec::new())
    }

    fn finish_close(
        &self,
        mut task: Task,
        opts: &CloseOptions,
        checks: Vec<CheckResult>,
        note: Option<&str>,
    ) -> Result<CloseOutcome> {
        let now = clock::now();
        let old = task.status;
        task.status = Status::Done;
        task.updated_at.clone_from(&now);
        opts.cost.apply(&mut task);
        if let Some(verifier) = &opts.verifier {
            task.verified_by = Some(verifier.clone());
        }

        let tx = self.store().begin()?;
        self.store().update_task(&task)?;
        self.system_journal(task.id.as_str(), &now, &format!("Status: {old} → done"))?;
        if let Some(note) = note {
            self.system_journal(task.id.as_str(), &now, note)?;
        }
        tx.commit()?;

        self.emit(&Event::new(
            EventOp::Close,
            task.id.as_str(),
            &now,
            json!({
                "status": "done",
                "cost_usd": task.cost_usd,
                "tokens_in": task.tokens_in,
                "tokens_out": task.tokens_out,
                "tokens_used": task.tokens_used,
                "duration_seconds": task.duration_seconds,
                "model_used": task.model_used,
            }),
        ));
        self.autocommit(&format!("trak: close {}", task.id));

        let unblocked = self.newly_unblocked(task.id.as_str())?;
        Ok(CloseOutcome::Closed { task, checks, unblocked })
    }

    fn block_close(
        &self,
        mut task: Task,
        why: &str,
        checks: Vec<CheckResult>,
    ) -> Result<CloseOutcome> {
        let now = clock::now();
        let old = task.status;
        let reason = format!("Close blocked: {why} — verification required");
        task.status = Status::Review;
        task.updated_at.clone_from(&now);

        let tx = self.store().begin()?;
        self.store().update_task(&task)?;
        if old != Status::Review {
            self.system_journal(task.id.as_str(), &now, &format!("Status: {old} → review"))?;
        }
        self.system_journal(task.id.as_str(), &now, &reason)?;
        tx.commit()?;

        self.emit(&Event::new(
            EventOp::Update,
            task.id.as_str(),
            &now,
            json!({"status": "review"}),
        ));
        self.autocommit(&format!("trak: close blocked {}", task.id));
        Ok(CloseOutcome::Blocked { task, reason, checks })
    }

    // -- the gate -----------------------------------------------------------

    fn run_gate(&self, task: &Task, opts: &CloseOptions) -> Vec<CheckResult> {
        let mut checks = Vec::new();
        let repo = self.repo_root();

        // Hard: the task's own verify command must exit zero.
        if let Some(cmd) = &task.verify_command {
            checks.push(run_verify_command(cmd, repo.as_deref()));
        }

        // Hard: a supplied commit must exist.
        if let Some(hash) = &opts.commit {
            let exists = repo
                .as_deref()
                .is_some_and(|r| gitsync::commit_exists(r, hash));
            checks.push(CheckResult {
                name: "commit",
                passed: exists,
                detail: if exists {
                    format!("Commit verified: {hash}")
                } else {
                    format!("Commit not found: {hash}")
                },
                hard: true,
            });
        }

        // Soft: a human or agent journaled something since entering wip.
        checks.push(journal_activity_check(task));

        // Soft: commits landed since the wip snapshot, ideally mentioning
        // the task id.
        checks.push(git_proof_check(task, repo.as_deref()));

        // Soft: an explicit proof artifact.
        checks.push(CheckResult {
            name: "proof-artifact",
            passed: opts.proof.is_some(),
            detail: opts.proof.clone().unwrap_or_else(|| "none supplied".to_owned()),
            hard: false,
        });

        checks
    }

    /// `autonomy = auto` tasks whose last incomplete parent was `closed_id`.
    fn newly_unblocked(&self, closed_id: &str) -> Result<Vec<Task>> {
        let mut unblocked = Vec::new();
        for dependent_id in self.store().dependents_of(closed_id)? {
            let Some(dependent) = self.store().get_task(&dependent_id)? else {
                continue;
            };
            if dependent.status == Status::Open
                && dependent.autonomy == Autonomy::Auto
                && graph::incomplete_parents(self.store(), &dependent_id)?.is_empty()
            {
                unblocked.push(dependent);
            }
        }
        Ok(unblocked)
    }
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

fn run_verify_command(cmd: &str, repo: Option<&std::path::Path>) -> CheckResult {
    let mut command = Command::new("sh");
    command.args(["-c", cmd]);
    if let Some(dir) = repo {
        command.current_dir(dir);
    }
    let (passed, detail) = match command.output() {
        Ok(out) if out.status.success() => (true, format!("`{cmd}` exited 0")),
        Ok(out) => (
            false,
            format!("`{cmd}` exited {}", out.status.code().unwrap_or(-1)),
        ),
        Err(e) => (false, format!("`{cmd}` failed to start: {e}")),
    };
    CheckResult { name: "verify-command", passed, detail, hard: true }
}

/// At least one non-system journal entry since the task last entered wip.
fn journal_activity_check(task: &Task) -> CheckResult {
    let wip_since = task
        .journal
        .iter()
        .rfind(|j| j.is_system() && j.entry.ends_with("→ wip"))
        .map_or_else(|| task.created_at.clone(), |j| j.timestamp.clone());

    let count = task
        .journal
        .iter()
        .filter(|j| !j.is_system() && j.timestamp >= wip_since)
        .count();
    CheckResult {
        name: "journal-activity",
        passed: count > 0,
        detail: format!("{count} entr{} since work started", if count == 1 { "y" } else { "ies" }),
        hard: false,
    }
}

/// Commits exist since the wip snapshot — preferentially ones that mention
/// the task id in their message.
fn git_proof_check(task: &Task, repo: Option<&std::path::Path>) -> CheckResult {
    let Some(repo) = repo else {
        return CheckResult {
            name: "git-proof",
            passed: false,
            detail: "no repository".to_owned(),
            hard: false,
        };
    };
    let base = task.wip_snapshot.as_deref();
    if base.is_none() {
        return CheckResult {
            name: "git-proof",
            passed: false,
            detail: "no wip snapshot baseline".to_owned(),
            hard: false,
        };
    }
    let tagged = gitsync::commits_since(repo, base, Some(task.id.as_str()));
    if !tagged.is_empty() {
        return CheckResult {
            name: "git-proof",
            passed: true,
            detail: format!("{} commit(s) referencing {}", tagged.len(), task.id),
            hard: false,
        };
    }
    let any = gitsync::commits_since(repo, base, None);
    CheckResult {
        name: "git-proof",
        passed: !any.is_empty(),
        detail: if any.is_empty() {
            "no commits since wip snapshot".to_owned()
        } else {
            format!("{} commit(s) since wip snapshot", any.len())
        },
        hard: false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
