//! `trak init` — create the workspace.

use std::fs;

use anyhow::{Context, Result};

use trak::engine::TaskEngine;
use trak::paths;

/// Ignore the store (and its WAL siblings); the event log is the file
/// that syncs through git.
const GITIGNORE: &str = "trak.db\ntrak.db-wal\ntrak.db-shm\ntrak.jsonl.tmp\n";

pub fn run() -> Result<()> {
    let target = paths::init_target()?;
    let fresh = !target.root().exists();

    fs::create_dir_all(target.root())
        .with_context(|| format!("failed to create {}", target.root().display()))?;
    fs::create_dir_all(target.locks_dir()).context("failed to create locks directory")?;
    if !target.gitignore().exists() {
        fs::write(target.gitignore(), GITIGNORE).context("failed to write .gitignore")?;
    }

    // Opening the engine creates and migrates the store.
    let engine = TaskEngine::at(target.clone())?;
    drop(engine);

    if fresh {
        println!("Initialized trak workspace at {}", target.root().display());
    } else {
        println!("trak workspace already present at {}", target.root().display());
    }
    Ok(())
}
