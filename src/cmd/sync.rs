//! `trak sync` — event-log maintenance and cross-branch merge.
//!
//! The default run pulls through git, resolves any conflict markers the
//! merge left in the event log (last-write-wins on `updated_at`), writes
//! the resolved records back, and rebuilds the store from the log.

use anyhow::{Context, Result, bail};
use clap::Args;

use trak::engine::TaskEngine;
use trak::eventlog::merge;
use trak::gitsync;

/// Arguments for `trak sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Rewrite the log as one snapshot per task from the store
    #[arg(long)]
    pub compact: bool,

    /// Rebuild the store from the event log (no git interaction)
    #[arg(long)]
    pub rebuild: bool,

    /// Resolve git conflict markers in the log, then rebuild
    #[arg(long)]
    pub resolve: bool,
}

pub fn run(args: &SyncArgs) -> Result<()> {
    let engine = TaskEngine::open()?;

    if args.compact {
        return compact(&engine);
    }
    if args.rebuild {
        return rebuild(&engine);
    }
    if args.resolve {
        return resolve(&engine);
    }

    // Full sync: pull, resolve if the merge conflicted, rebuild.
    if let Some(repo) = engine.repo_root() {
        match gitsync::pull(&repo) {
            Some(output) => {
                let summary = output.lines().last().unwrap_or("done");
                println!("pull: {summary}");
            }
            None => println!("pull: skipped (no remote or not a repository)"),
        }
    }
    let raw = engine.log().read_raw()?;
    if merge::has_conflict_markers(&raw) {
        resolve(&engine)
    } else {
        rebuild(&engine)
    }
}

fn compact(engine: &TaskEngine) -> Result<()> {
    let tasks = engine.store().all_tasks_full()?;
    engine.log().compact(&tasks).context("log compaction failed")?;
    println!("Compacted {} task(s) into {}", tasks.len(), engine.log().path().display());
    Ok(())
}

fn rebuild(engine: &TaskEngine) -> Result<()> {
    let tasks = engine.log().replay()?;
    engine.store().replace_all(&tasks)?;
    println!("Rebuilt store from {} task(s)", tasks.len());
    Ok(())
}

fn resolve(engine: &TaskEngine) -> Result<()> {
    let raw = engine.log().read_raw()?;
    if !merge::has_conflict_markers(&raw) {
        println!("No conflict markers found.");
        return rebuild(engine);
    }
    let (tasks, resolutions) = match merge::resolve(&raw) {
        Ok(resolved) => resolved,
        Err(detail) => bail!(
            "corrupt event log at {}: {detail}",
            engine.log().path().display()
        ),
    };
    engine.log().compact(&tasks).context("writing resolved log failed")?;
    engine.store().replace_all(&tasks)?;

    for r in &resolutions {
        println!("resolved {}: kept {}", r.task_id, r.winner);
    }
    println!("Merged {} task(s), {} conflict(s) resolved", tasks.len(), resolutions.len());
    Ok(())
}
