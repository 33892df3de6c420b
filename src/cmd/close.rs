//! `trak close` — the verification gate.

use anyhow::{Result, bail};
use clap::Args;

use trak::engine::{CloseOptions, CloseOutcome, CostAdditions, TaskEngine};

use super::summary_line;

/// Arguments for `trak close`.
#[derive(Args, Debug)]
pub struct CloseArgs {
    /// Task id or unique suffix
    pub id: String,

    /// Run the verification gate
    #[arg(long)]
    pub verify: bool,

    /// Human override: close without verification
    #[arg(long)]
    pub force: bool,

    /// Proof artifact (URL, file, free text) for the gate
    #[arg(long)]
    pub proof: Option<String>,

    /// Commit hash that must exist in the repository
    #[arg(long)]
    pub commit: Option<String>,

    /// Verifier identity recorded on success
    #[arg(long)]
    pub verified_by: Option<String>,

    /// USD to add to the task's spend
    #[arg(long)]
    pub cost: Option<f64>,

    /// Input tokens to add
    #[arg(long)]
    pub tokens_in: Option<i64>,

    /// Output tokens to add
    #[arg(long)]
    pub tokens_out: Option<i64>,

    /// Model that did the work
    #[arg(long)]
    pub model: Option<String>,

    /// Seconds of wall-clock to add
    #[arg(long)]
    pub duration: Option<f64>,
}

pub fn run(args: &CloseArgs) -> Result<()> {
    let engine = TaskEngine::open()?;
    let outcome = engine.close(
        &args.id,
        &CloseOptions {
            verify: args.verify,
            force: args.force,
            proof: args.proof.clone(),
            commit: args.commit.clone(),
            verifier: args.verified_by.clone(),
            cost: CostAdditions {
                cost_usd: args.cost,
                tokens_in: args.tokens_in,
                tokens_out: args.tokens_out,
                model: args.model.clone(),
                duration_seconds: args.duration,
            },
        },
    )?;

    match outcome {
        CloseOutcome::AlreadyDone(task) => {
            println!("Already done: {}", task.id);
            Ok(())
        }
        CloseOutcome::Closed { task, checks, unblocked } => {
            for check in &checks {
                let verdict = if check.passed { "pass" } else { "fail" };
                println!("  {}: {verdict} — {}", check.name, check.detail);
            }
            println!("Closed {}", summary_line(&task));
            if !unblocked.is_empty() {
                println!("\nunblocked:");
                for t in &unblocked {
                    println!("  {}", summary_line(t));
                }
            }
            Ok(())
        }
        CloseOutcome::Blocked { task, reason, checks } => {
            for check in &checks {
                let verdict = if check.passed { "pass" } else { "fail" };
                println!("  {}: {verdict} — {}", check.name, check.detail);
            }
            // Error exit so automation notices; the task is now in review.
            bail!("{reason} ({} is now in review)", task.id);
        }
    }
}
