//! The dispatch loop: claim ready auto-tasks and hand them to the gateway.
//!
//! A run cycle queries the ready pool (open, `autonomy = auto`, deps
//! complete, under budget, priority within the dispatch window, backoff
//! elapsed), then for each task up to the parallelism cap: takes the
//! workspace lock (skipping on conflict — the next cycle retries), claims
//! the task by transitioning it to `wip`, builds the instruction text, and
//! spawns an agent. The orchestrator never waits for agents; they close
//! their own tasks through the verification gate, and an abandoned lock
//! simply expires.

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use trak_gateway::{GatewayClient, SpawnSpec};

use crate::cost;
use crate::engine::TaskEngine;
use crate::error::Result;
use crate::graph;
use crate::locks::AcquireOutcome;
use crate::model::{Autonomy, Status, Task};
use crate::store::TaskFilter;

/// Agent label the orchestrator claims tasks under.
pub const RUN_AGENT: &str = "trak-run";

/// Watch-mode poll interval.
pub const WATCH_INTERVAL: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Options & reports
// ---------------------------------------------------------------------------

/// Knobs for one `run` invocation.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Restrict the pool to one project.
    pub project: Option<String>,
    /// Parallelism cap (default from config, default 3).
    pub max_agents: Option<usize>,
    /// Widen or narrow the priority window (default from config, default 1).
    pub min_priority: Option<i64>,
    /// Model override passed to spawned agents.
    pub model: Option<String>,
    /// Dispatch timeout override in seconds (beats every config layer).
    pub timeout_secs: Option<u64>,
    /// Report what would dispatch without locking or spawning.
    pub dry_run: bool,
}

/// How one task's dispatch went.
#[derive(Clone, Debug)]
pub enum DispatchOutcome {
    /// Agent spawned; the child session key.
    Spawned {
        /// Gateway session key of the spawned agent.
        session: String,
    },
    /// Would have dispatched (dry run).
    WouldSpawn,
    /// The workspace lock is held by another task; skipped this cycle.
    LockHeld {
        /// The holding task.
        holder: String,
    },
    /// The gateway refused or errored for this task.
    SpawnFailed {
        /// The error text.
        error: String,
    },
}

/// Per-task record of a run cycle.
#[derive(Clone, Debug)]
pub struct DispatchReport {
    /// The task that was considered.
    pub task: Task,
    /// What happened.
    pub outcome: DispatchOutcome,
    /// The timeout the agent was (or would be) given.
    pub timeout_secs: u64,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Pure consumer of the engine, lock manager, and gateway contracts.
pub struct Orchestrator<'a> {
    engine: &'a TaskEngine,
    /// Repo the workspace lock guards (the directory agents work in).
    workdir: PathBuf,
}

impl<'a> Orchestrator<'a> {
    /// Bind to an engine, locking the current working directory.
    ///
    /// # Errors
    /// Failure to read the current directory.
    pub fn new(engine: &'a TaskEngine) -> Result<Self> {
        Ok(Self {
            engine,
            workdir: std::env::current_dir()?,
        })
    }

    /// Bind with an explicit working directory (test seam).
    #[must_use]
    pub const fn with_workdir(engine: &'a TaskEngine, workdir: PathBuf) -> Self {
        Self { engine, workdir }
    }

    /// Tasks eligible for dispatch right now, in (priority, age) order.
    ///
    /// # Errors
    /// Store failures.
    pub fn ready_pool(&self, opts: &RunOptions) -> Result<Vec<Task>> {
        let min_priority = opts
            .min_priority
            .unwrap_or(self.engine.config().agent.min_priority);
        let filter = TaskFilter {
            status: Some(Status::Open),
            project: opts.project.clone(),
            include_closed: false,
        };
        let mut pool = Vec::new();
        for task in self.engine.store().list_tasks(&filter)? {
            if task.autonomy != Autonomy::Auto {
                continue;
            }
            if task.priority > min_priority {
                continue;
            }
            if !cost::is_budget_available(&task) {
                continue;
            }
            if !graph::ready(self.engine.store(), &task)? {
                continue;
            }
            pool.push(task);
        }
        Ok(pool)
    }

    /// One dispatch cycle: up to `capacity` tasks from the ready pool.
    /// The gateway must already have been probed by the caller.
    ///
    /// # Errors
    /// Store failures. Per-task gateway failures land in the report, not
    /// here.
    pub fn run_cycle(
        &self,
        opts: &RunOptions,
        gateway: &GatewayClient,
        capacity: usize,
    ) -> Result<Vec<DispatchReport>> {
        let pool = self.ready_pool(opts)?;
        let mut reports = Vec::new();
        for task in pool.into_iter().take(capacity) {
            reports.push(self.dispatch(task, opts, gateway)?);
        }
        Ok(reports)
    }

    /// Full `run`: probe the gateway (abort when unreachable), then one
    /// cycle at the configured parallelism.
    ///
    /// # Errors
    /// Gateway unreachable, store failures.
    pub fn run(&self, opts: &RunOptions, gateway: &GatewayClient) -> Result<Vec<DispatchReport>> {
        if !opts.dry_run {
            gateway.probe().map_err(crate::error::TrakError::from)?;
        }
        self.run_cycle(opts, gateway, self.max_agents(opts))
    }

    /// The effective parallelism cap.
    #[must_use]
    pub fn max_agents(&self, opts: &RunOptions) -> usize {
        opts.max_agents.unwrap_or(self.engine.config().agent.max_agents)
    }

    /// The timeout this task's agent would get, walking the resolution
    /// chain (CLI flag, task, project, tag profile, global, default).
    #[must_use]
    pub fn effective_timeout(&self, task: &Task, opts: &RunOptions) -> u64 {
        self.engine.config().resolve_timeout_secs(
            opts.timeout_secs,
            task.timeout_seconds,
            task.project.as_deref(),
            &task.tag_list(),
        )
    }

    fn dispatch(
        &self,
        task: Task,
        opts: &RunOptions,
        gateway: &GatewayClient,
    ) -> Result<DispatchReport> {
        let timeout_secs = self.effective_timeout(&task, opts);

        if opts.dry_run {
            return Ok(DispatchReport {
                task,
                outcome: DispatchOutcome::WouldSpawn,
                timeout_secs,
            });
        }

        // Workspace lock first; a conflict skips the task this cycle
        // without queueing — the next cycle simply retries.
        let locks = self.engine.locks();
        match locks.acquire(&self.workdir, task.id.as_str(), RUN_AGENT, &[])? {
            AcquireOutcome::Acquired(_) => {}
            AcquireOutcome::Conflict(conflict) => {
                return Ok(DispatchReport {
                    task,
                    outcome: DispatchOutcome::LockHeld {
                        holder: conflict.holder.task_id,
                    },
                    timeout_secs,
                });
            }
        }

        // Claim: the authoritative signal is the status transition, not
        // the soft claim table.
        let task = self.engine.assign(task.id.as_str(), RUN_AGENT)?;

        let spec = SpawnSpec {
            task: instruction_for(&task, &self.workdir),
            label: format!("trak-{}", task.id),
            run_timeout_seconds: timeout_secs,
            model: opts.model.clone(),
        };
        match gateway.spawn_agent(&spec) {
            Ok(session) => {
                info!(task = %task.id, %session, "agent dispatched");
                Ok(DispatchReport {
                    task,
                    outcome: DispatchOutcome::Spawned { session },
                    timeout_secs,
                })
            }
            Err(e) => {
                // Leave the claim in place; the lock expires and a later
                // cycle (or a human) picks the task back up.
                Ok(DispatchReport {
                    task,
                    outcome: DispatchOutcome::SpawnFailed { error: e.to_string() },
                    timeout_secs,
                })
            }
        }
    }

    /// Watch mode: poll for newly ready tasks, dispatching into whatever
    /// capacity this watch session has left. `max_cycles` bounds the loop
    /// for tests; interactive callers pass `None` and stop with ctrl-c
    /// (there is no in-flight state to unwind — locks expire on their
    /// own).
    ///
    /// # Errors
    /// Gateway unreachable at start, store failures.
    pub fn watch(
        &self,
        opts: &RunOptions,
        gateway: &GatewayClient,
        max_cycles: Option<usize>,
        mut on_cycle: impl FnMut(&[DispatchReport]),
    ) -> Result<()> {
        if !opts.dry_run {
            gateway.probe().map_err(crate::error::TrakError::from)?;
        }
        let capacity = self.max_agents(opts);
        let mut dispatched = 0usize;
        let mut cycle = 0usize;
        loop {
            let remaining = capacity.saturating_sub(dispatched);
            if remaining > 0 {
                let reports = self.run_cycle(opts, gateway, remaining)?;
                dispatched += reports
                    .iter()
                    .filter(|r| {
                        matches!(
                            r.outcome,
                            DispatchOutcome::Spawned { .. } | DispatchOutcome::WouldSpawn
                        )
                    })
                    .count();
                on_cycle(&reports);
            }
            cycle += 1;
            if let Some(max) = max_cycles
                && cycle >= max
            {
                return Ok(());
            }
            std::thread::sleep(WATCH_INTERVAL);
        }
    }
}

/// The instruction text handed to a spawned agent: what the task is, where
/// to work, and the required close protocol.
#[must_use]
pub fn instruction_for(task: &Task, workdir: &std::path::Path) -> String {
    let mut text = format!(
        "You are working on task {id}: {title}\n",
        id = task.id,
        title = task.title
    );
    if !task.description.is_empty() {
        text.push_str(&format!("\nDescription:\n{}\n", task.description));
    }
    if let Some(project) = &task.project {
        text.push_str(&format!("\nProject: {project}\n"));
    }
    text.push_str(&format!("\nWorking directory: {}\n", workdir.display()));
    text.push_str(&format!(
        "\nWhen the work is complete, run `trak close {id} --verify` from the \
         working directory (journal progress with `trak log {id} \"...\"` as you \
         go — the close gate wants proof of work). If you cannot finish, run \
         `trak fail {id} \"<reason>\"` so the task can retry.\n",
        id = task.id
    ));
    text
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::engine;
    use crate::engine::CreateOptions;

    fn auto_task(e: &TaskEngine, title: &str, priority: i64) -> Task {
        e.create(
            title,
            &CreateOptions {
                autonomy: Some(Autonomy::Auto),
                priority: Some(priority),
                ..CreateOptions::default()
            },
        )
        .expect("create")
    }

    fn orchestrator<'a>(e: &'a TaskEngine, tmp: &tempfile::TempDir) -> Orchestrator<'a> {
        Orchestrator::with_workdir(e, tmp.path().to_path_buf())
    }

    #[test]
    fn pool_takes_only_ready_auto_tasks_in_priority_window() {
        let (e, tmp) = engine();
        let p0 = auto_task(&e, "urgent", 0);
        auto_task(&e, "low prio", 3);
        e.create("manual", &CreateOptions::default()).expect("create");
        let orch = orchestrator(&e, &tmp);

        let pool = orch.ready_pool(&RunOptions::default()).expect("pool");
        let ids: Vec<&str> = pool.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![p0.id.as_str()]);

        // Widening the window admits the P3 task.
        let pool = orch
            .ready_pool(&RunOptions { min_priority: Some(3), ..RunOptions::default() })
            .expect("pool");
        assert_eq!(pool.len(), 2);
        assert_eq!(pool[0].priority, 0);
    }

    #[test]
    fn pool_excludes_blocked_backed_off_and_over_budget() {
        let (e, tmp) = engine();
        let blocked = auto_task(&e, "blocked", 0);
        let parent = e.create("parent", &CreateOptions::default()).expect("create");
        e.dep_add(blocked.id.as_str(), parent.id.as_str()).expect("dep");

        let broke = auto_task(&e, "broke", 0);
        let mut broke_task = e.resolve(broke.id.as_str()).expect("resolve");
        broke_task.budget_usd = Some(1.0);
        broke_task.cost_usd = 1.5;
        e.store().update_task(&broke_task).expect("update");

        let backed_off = auto_task(&e, "backed off", 0);
        let mut bo = e.resolve(backed_off.id.as_str()).expect("resolve");
        bo.retry_after = Some(crate::clock::now_plus_minutes(30));
        e.store().update_task(&bo).expect("update");

        let orch = orchestrator(&e, &tmp);
        assert!(orch.ready_pool(&RunOptions::default()).expect("pool").is_empty());
    }

    #[test]
    fn pool_filters_by_project() {
        let (e, tmp) = engine();
        let web = e
            .create(
                "web task",
                &CreateOptions {
                    autonomy: Some(Autonomy::Auto),
                    priority: Some(0),
                    project: Some("web".to_owned()),
                    ..CreateOptions::default()
                },
            )
            .expect("create");
        auto_task(&e, "other", 0);

        let orch = orchestrator(&e, &tmp);
        let pool = orch
            .ready_pool(&RunOptions { project: Some("web".to_owned()), ..RunOptions::default() })
            .expect("pool");
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].id, web.id);
    }

    #[test]
    fn effective_timeout_walks_the_chain() {
        let (e, tmp) = engine();
        let task = auto_task(&e, "timed", 1);
        let orch = orchestrator(&e, &tmp);

        // Nothing set anywhere: the 900s default.
        assert_eq!(orch.effective_timeout(&task, &RunOptions::default()), 900);
        // CLI flag beats everything.
        assert_eq!(
            orch.effective_timeout(
                &task,
                &RunOptions { timeout_secs: Some(60), ..RunOptions::default() }
            ),
            60
        );
        // Task override beats config.
        let mut t = task;
        t.timeout_seconds = Some(1200);
        assert_eq!(orch.effective_timeout(&t, &RunOptions::default()), 1200);
    }

    #[test]
    fn dry_run_reports_without_mutating() {
        let (e, tmp) = engine();
        let task = auto_task(&e, "dry", 0);
        let orch = orchestrator(&e, &tmp);

        // Dry run needs no live gateway.
        let gateway = GatewayClient::new(trak_gateway::GatewayConfig {
            base_url: "http://127.0.0.1:1".to_owned(),
            token: None,
        })
        .expect("client");
        let reports = orch
            .run(&RunOptions { dry_run: true, ..RunOptions::default() }, &gateway)
            .expect("run");
        assert_eq!(reports.len(), 1);
        assert!(matches!(reports[0].outcome, DispatchOutcome::WouldSpawn));

        // The task is untouched.
        let after = e.resolve(task.id.as_str()).expect("resolve");
        assert_eq!(after.status, Status::Open);
        assert!(after.assigned_to.is_none());
    }

    #[test]
    fn lock_conflict_skips_the_task() {
        let (e, tmp) = engine();
        let task = auto_task(&e, "locked out", 0);
        let orch = orchestrator(&e, &tmp);

        // Another task holds the workspace.
        let locks = e.locks();
        let held = locks
            .acquire(tmp.path(), "trak-ffffff", "other-agent", &[])
            .expect("acquire");
        assert!(matches!(held, AcquireOutcome::Acquired(_)));

        let gateway = GatewayClient::new(trak_gateway::GatewayConfig {
            base_url: "http://127.0.0.1:1".to_owned(),
            token: None,
        })
        .expect("client");
        let reports = orch
            .run_cycle(&RunOptions::default(), &gateway, 3)
            .expect("cycle");
        assert_eq!(reports.len(), 1);
        let DispatchOutcome::LockHeld { holder } = &reports[0].outcome else {
            panic!("expected lock conflict, got {:?}", reports[0].outcome);
        };
        assert_eq!(holder, "trak-ffffff");

        // Not claimed, still open, and not queued (run never queues).
        let after = e.resolve(task.id.as_str()).expect("resolve");
        assert_eq!(after.status, Status::Open);
        assert!(locks.queue_for(tmp.path()).expect("queue").is_empty());
    }

    #[test]
    fn instruction_names_id_title_workdir_and_protocol() {
        let (e, _tmp) = engine();
        let mut task = auto_task(&e, "Build the widget", 1);
        task.description = "Small self-contained change.".to_owned();
        task.project = Some("web".to_owned());

        let text = instruction_for(&task, std::path::Path::new("/work/repo"));
        assert!(text.contains(task.id.as_str()));
        assert!(text.contains("Build the widget"));
        assert!(text.contains("Small self-contained change."));
        assert!(text.contains("Project: web"));
        assert!(text.contains("/work/repo"));
        assert!(text.contains(&format!("trak close {} --verify", task.id)));
        assert!(text.contains(&format!("trak fail {}", task.id)));
    }
}
