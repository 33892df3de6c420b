//! Read-only queries: ready, next, heat, trace.

use anyhow::Result;
use clap::Args;

use trak::engine::TaskEngine;
use trak::graph;
use trak::model::{Autonomy, Status};
use trak::store::TaskFilter;

use super::summary_line;

/// Shared filter for the pool queries.
#[derive(Args, Debug)]
pub struct PoolArgs {
    /// Only this project
    #[arg(long, short = 'p')]
    pub project: Option<String>,
}

/// Tasks that could start right now.
pub fn ready(args: &PoolArgs) -> Result<()> {
    print_ready(args, false)
}

/// `ready`, restricted to what the orchestrator may dispatch.
pub fn next(args: &PoolArgs) -> Result<()> {
    print_ready(args, true)
}

fn print_ready(args: &PoolArgs, auto_only: bool) -> Result<()> {
    let engine = TaskEngine::open()?;
    let tasks = engine.store().list_tasks(&TaskFilter {
        status: Some(Status::Open),
        project: args.project.clone(),
        include_closed: false,
    })?;

    let mut any = false;
    for task in &tasks {
        if auto_only && task.autonomy != Autonomy::Auto {
            continue;
        }
        if graph::ready(engine.store(), task)? {
            println!("{}", summary_line(task));
            any = true;
        }
    }
    if !any {
        println!("Nothing ready.");
    }
    Ok(())
}

/// Attention-ranked view.
pub fn heat(args: &PoolArgs) -> Result<()> {
    let engine = TaskEngine::open()?;
    let scored = graph::heat_map(
        engine.store(),
        &TaskFilter { project: args.project.clone(), ..TaskFilter::default() },
    )?;
    if scored.is_empty() {
        println!("No open tasks.");
        return Ok(());
    }
    for (task, score) in &scored {
        println!("{score:>3}  {}", summary_line(task));
    }
    Ok(())
}

/// Dependency neighborhood, both directions.
pub fn trace(id: &str, depth: usize) -> Result<()> {
    let engine = TaskEngine::open()?;
    let task = engine.resolve(id)?;
    let trace = graph::trace(engine.store(), task.id.as_str(), depth)?;

    println!("{}", summary_line(&task));
    if trace.upstream.is_empty() {
        println!("\nupstream: none");
    } else {
        println!("\nupstream (what this waits on):");
        for level in &trace.upstream {
            for t in &level.tasks {
                println!("  {}{}", "  ".repeat(level.depth - 1), summary_line(t));
            }
        }
    }
    if trace.downstream.is_empty() {
        println!("\ndownstream: none");
    } else {
        println!("\ndownstream (what waits on this):");
        for level in &trace.downstream {
            for t in &level.tasks {
                println!("  {}{}", "  ".repeat(level.depth - 1), summary_line(t));
            }
        }
    }
    Ok(())
}
