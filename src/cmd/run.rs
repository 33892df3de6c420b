//! `trak run` — dispatch ready auto-tasks to the agent gateway.

use anyhow::Result;
use clap::Args;

use trak::engine::TaskEngine;
use trak::orchestrator::{DispatchOutcome, DispatchReport, Orchestrator, RunOptions};
use trak_gateway::{GatewayClient, GatewayConfig};

use super::summary_line;

/// Arguments for `trak run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Only dispatch tasks in this project
    #[arg(long, short = 'p')]
    pub project: Option<String>,

    /// Parallelism cap (default from config, default 3)
    #[arg(long)]
    pub max_agents: Option<usize>,

    /// Widen the priority window (default 1: only P0/P1 dispatch)
    #[arg(long)]
    pub min_priority: Option<i64>,

    /// Model override for spawned agents
    #[arg(long)]
    pub model: Option<String>,

    /// Timeout override ("30m", "1h30m", "90s", or bare seconds)
    #[arg(long)]
    pub timeout: Option<String>,

    /// Poll for newly ready tasks every 5s, dispatching into spare capacity
    #[arg(long, short = 'w')]
    pub watch: bool,

    /// Show what would dispatch without locking or spawning
    #[arg(long)]
    pub dry_run: bool,
}

pub fn run(args: &RunArgs) -> Result<()> {
    let engine = TaskEngine::open()?;
    let orchestrator = Orchestrator::new(&engine)?;

    let timeout_secs = match &args.timeout {
        Some(raw) => Some(trak::duration::parse_secs(raw).map_err(anyhow::Error::msg)?),
        None => None,
    };
    let opts = RunOptions {
        project: args.project.clone(),
        max_agents: args.max_agents,
        min_priority: args.min_priority,
        model: args.model.clone(),
        timeout_secs,
        dry_run: args.dry_run,
    };

    let config = GatewayConfig::discover();
    let gateway = GatewayClient::new(config)?;

    if args.watch {
        println!(
            "Watching for ready tasks (gateway {}, up to {} agents) — ctrl-c to stop",
            gateway.base_url(),
            orchestrator.max_agents(&opts)
        );
        orchestrator.watch(&opts, &gateway, None, print_reports)?;
        return Ok(());
    }

    let reports = orchestrator.run(&opts, &gateway)?;
    if reports.is_empty() {
        println!("Nothing to dispatch.");
        return Ok(());
    }
    print_reports(&reports);
    Ok(())
}

fn print_reports(reports: &[DispatchReport]) {
    for report in reports {
        match &report.outcome {
            DispatchOutcome::Spawned { session } => {
                println!(
                    "Dispatched {} (timeout {}s, session {session})",
                    summary_line(&report.task),
                    report.timeout_secs
                );
            }
            DispatchOutcome::WouldSpawn => {
                println!(
                    "Would dispatch {} (timeout {}s)",
                    summary_line(&report.task),
                    report.timeout_secs
                );
            }
            DispatchOutcome::LockHeld { holder } => {
                println!(
                    "Skipped {} — workspace locked by {holder}",
                    report.task.id
                );
            }
            DispatchOutcome::SpawnFailed { error } => {
                println!("Failed to dispatch {}: {error}", report.task.id);
            }
        }
    }
}
