//! `trak lock` — workspace locks.

use std::env;

use anyhow::{Result, bail};
use clap::Subcommand;

use trak::engine::TaskEngine;
use trak::locks::{AcquireOutcome, ConflictKind, QueueOutcome};

/// Lock subcommands. All operate on the current working directory's repo.
#[derive(Subcommand, Debug)]
pub enum LockCommands {
    /// Take (or re-take) the workspace lock for a task
    Acquire {
        /// The task doing the work
        task: String,
        /// Comma-joined file patterns (omit for a whole-repo lock)
        #[arg(long)]
        files: Option<String>,
        /// Agent label (default: $TRAK_AGENT, then "human")
        #[arg(long)]
        agent: Option<String>,
        /// Park in the repo's queue instead of failing on conflict
        #[arg(long)]
        queue: bool,
        /// Queue priority (0 first)
        #[arg(long, default_value_t = 1)]
        priority: i64,
    },

    /// Release a lock (the primary lock, or a specific task's)
    Release {
        /// Release this task's lock instead of the primary one
        #[arg(long)]
        task: Option<String>,
    },

    /// Show locks and queue for this repo
    Status,

    /// Force-remove every lock on this repo (emergency recovery)
    Break {
        /// Why the lock is being broken
        #[arg(long, default_value = "manual break")]
        reason: String,
        /// Who is breaking it
        #[arg(long, default_value = "human")]
        by: String,
    },

    /// Extend a held lock's expiry (holder only)
    Renew {
        /// The task holding the lock
        task: String,
    },
}

fn agent_label(explicit: Option<&str>) -> String {
    explicit
        .map(str::to_owned)
        .or_else(|| env::var("TRAK_AGENT").ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "human".to_owned())
}

fn split_files(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_owned)
            .collect()
    })
    .unwrap_or_default()
}

pub fn run(cmd: &LockCommands) -> Result<()> {
    let engine = TaskEngine::open()?;
    let locks = engine.locks();
    let repo = env::current_dir()?;

    match cmd {
        LockCommands::Acquire { task, files, agent, queue, priority } => {
            let task = engine.store().resolve_id(task)?;
            let agent = agent_label(agent.as_deref());
            let files = split_files(files.as_deref());

            if *queue {
                match locks.acquire_or_queue(&repo, task.as_str(), &agent, &files, *priority)? {
                    QueueOutcome::Acquired(lock) => {
                        println!("Locked {} for {}", lock.repo_path, lock.task_id);
                    }
                    QueueOutcome::Queued { position, holder, conflicting } => {
                        println!(
                            "Queued at position {position} (held by {}{})",
                            holder.task_id,
                            if conflicting.is_empty() {
                                String::new()
                            } else {
                                format!("; overlapping: {}", conflicting.join(", "))
                            }
                        );
                    }
                    QueueOutcome::AlreadyQueued { position } => {
                        println!("Already queued at position {position}");
                    }
                }
                return Ok(());
            }

            match locks.acquire(&repo, task.as_str(), &agent, &files)? {
                AcquireOutcome::Acquired(lock) => {
                    println!("Locked {} for {}", lock.repo_path, lock.task_id);
                    if !lock.files.is_empty() {
                        println!("  files: {}", lock.files.join(", "));
                    }
                    println!("  expires: {}", lock.expires_at);
                    Ok(())
                }
                AcquireOutcome::Conflict(conflict) => match conflict.kind {
                    ConflictKind::Repo => bail!(
                        "lock conflict: repo held by {} (agent {}, expires {})",
                        conflict.holder.task_id,
                        conflict.holder.agent,
                        conflict.holder.expires_at
                    ),
                    ConflictKind::Files => bail!(
                        "lock conflict: {} holds overlapping files: {}",
                        conflict.holder.task_id,
                        conflict.overlapping.join(", ")
                    ),
                },
            }
        }

        LockCommands::Release { task } => {
            match locks.release(&repo, task.as_deref())? {
                Some(lock) => println!("Released lock held by {}", lock.task_id),
                None => println!("No lock to release."),
            }
            Ok(())
        }

        LockCommands::Status => {
            let held = locks.locks_for(&repo)?;
            if held.is_empty() {
                println!("No locks on {}", repo.display());
            } else {
                for lock in &held {
                    println!(
                        "{}  [{}]  agent {}  expires {}{}",
                        lock.task_id,
                        match lock.lock_type {
                            trak::locks::LockType::Repo => "repo",
                            trak::locks::LockType::Files => "files",
                        },
                        lock.agent,
                        lock.expires_at,
                        if lock.files.is_empty() {
                            String::new()
                        } else {
                            format!("  ({})", lock.files.join(", "))
                        }
                    );
                }
            }
            let queue = locks.queue_for(&repo)?;
            if !queue.is_empty() {
                println!("\nqueue:");
                for (i, entry) in queue.iter().enumerate() {
                    println!(
                        "  {i}. {} (P{}, {} since {})",
                        entry.task_id, entry.priority, entry.agent, entry.requested_at
                    );
                }
            }
            Ok(())
        }

        LockCommands::Break { reason, by } => {
            let broken = locks.break_locks(&repo, by, reason)?;
            if broken.is_empty() {
                println!("No locks to break.");
            } else {
                for lock in &broken {
                    println!("Broke lock held by {} ({})", lock.task_id, lock.agent);
                }
            }
            Ok(())
        }

        LockCommands::Renew { task } => {
            let task = engine.store().resolve_id(task)?;
            let lock = locks.renew(&repo, task.as_str())?;
            println!("Renewed until {}", lock.expires_at);
            Ok(())
        }
    }
}
