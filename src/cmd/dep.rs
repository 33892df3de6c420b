//! `trak dep` — dependency edges.

use anyhow::Result;
use clap::Subcommand;

use trak::engine::{DepOutcome, TaskEngine};

/// Dependency subcommands.
#[derive(Subcommand, Debug)]
pub enum DepCommands {
    /// Make child wait on parent (child cannot start until parent is done)
    Add {
        /// The task that waits
        child: String,
        /// The task it waits on
        parent: String,
    },

    /// Remove a dependency edge
    Rm {
        /// The task that was waiting
        child: String,
        /// The task it was waiting on
        parent: String,
    },
}

pub fn run(cmd: &DepCommands) -> Result<()> {
    let engine = TaskEngine::open()?;
    match cmd {
        DepCommands::Add { child, parent } => match engine.dep_add(child, parent)? {
            DepOutcome::Added => println!("{child} now depends on {parent}"),
            DepOutcome::Duplicate => {
                println!("warning: {child} already depends on {parent}");
            }
            _ => {}
        },
        DepCommands::Rm { child, parent } => match engine.dep_rm(child, parent)? {
            DepOutcome::Removed => println!("{child} no longer depends on {parent}"),
            DepOutcome::Missing => {
                println!("warning: no dependency {child} → {parent}");
            }
            _ => {}
        },
    }
    Ok(())
}
