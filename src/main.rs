use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;

/// Local-first task tracker and multi-agent orchestrator
///
/// trak keeps tasks in a per-repo `.trak/` workspace: a SQLite store for
/// queries, an append-only JSONL event log as the durable source of truth
/// (synced through git like any other file), and file-based workspace
/// locks so concurrent agents stay out of each other's way.
///
/// QUICK START:
///
///   trak init
///   trak add "Fix the widget" --project web --priority 1
///   trak list
///   trak log trak-ab12cd "found the root cause"
///   trak close trak-ab12cd --verify
///
/// AGENT WORKFLOW:
///
///   1. Mark tasks dispatchable:  trak add "..." --autonomy auto
///   2. Wire up ordering:         trak dep add <child> <parent>
///   3. Dispatch:                 trak run [--watch]
///   4. Agents journal progress and close through the verification gate.
#[derive(Parser)]
#[command(name = "trak")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'trak <command> --help' for more information on a specific command.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a trak workspace in this repository
    ///
    /// Creates `.trak/` at the enclosing git root (or here, outside a
    /// repo) with the store, the event log, and a `.gitignore` that keeps
    /// the log tracked while ignoring the store. Safe to run twice.
    Init,

    /// Create a task
    Add(cmd::task::AddArgs),

    /// List tasks (open work by default)
    List(cmd::task::ListArgs),

    /// Show one task in full: fields, journal, deps, claims
    Show {
        /// Task id or unique suffix
        id: String,
    },

    /// Change a task's status
    ///
    /// Entering wip captures the current git HEAD as the baseline for
    /// later proof-of-work checks.
    Status {
        /// Task id or unique suffix
        id: String,
        /// open | wip | blocked | review | done | archived | failed
        status: String,
    },

    /// Assign an agent (open/review tasks auto-enter wip)
    Assign {
        /// Task id or unique suffix
        id: String,
        /// Agent label
        agent: String,
    },

    /// Append a journal entry (optionally recording cost)
    Log(cmd::task::LogArgs),

    /// Close a task through the verification gate
    ///
    /// Closes need a prior passed verification, --force, or a --verify
    /// run where no hard check fails and at least one soft check passes
    /// (journal activity, git commits since the wip snapshot, or --proof).
    /// A blocked close parks the task in review and exits non-zero.
    Close(cmd::close::CloseArgs),

    /// Record a failed attempt
    ///
    /// With retries remaining the task rewinds to open behind a backoff;
    /// once max_retries is reached it lands in failed.
    Fail {
        /// Task id or unique suffix
        id: String,
        /// Why the attempt gave up
        reason: String,
    },

    /// Put a failed or backed-off task straight back in play
    Retry {
        /// Task id or unique suffix
        id: String,
        /// Also zero the retry counter
        #[arg(long)]
        reset_count: bool,
    },

    /// Delete a task and everything it owns
    Delete {
        /// Task id or unique suffix
        id: String,
    },

    /// Manage dependency edges
    #[command(subcommand)]
    Dep(cmd::dep::DepCommands),

    /// Tasks ready to start (open, deps complete, backoff elapsed)
    Ready(cmd::query::PoolArgs),

    /// Ready tasks the orchestrator may dispatch (autonomy=auto)
    Next(cmd::query::PoolArgs),

    /// Attention-ranked tasks (fan-out, age, recency, priority)
    Heat(cmd::query::PoolArgs),

    /// Walk a task's dependency neighborhood in both directions
    Trace {
        /// Task id or unique suffix
        id: String,
        /// Levels to walk each way
        #[arg(long, default_value_t = 5)]
        depth: usize,
    },

    /// Soft-claim a task for an agent (advisory; does not dispatch)
    Claim {
        /// Task id or unique suffix
        id: String,
        /// Claiming agent label
        agent: String,
        /// Model the agent intends to use
        #[arg(long)]
        model: Option<String>,
    },

    /// Release an agent's soft claim
    Release {
        /// Task id or unique suffix
        id: String,
        /// Agent label that holds the claim
        agent: String,
    },

    /// Workspace locks: acquire, release, status, break, renew
    #[command(subcommand)]
    Lock(cmd::lock::LockCommands),

    /// Cost breakdown and budget status for a task
    Cost {
        /// Task id or unique suffix
        id: String,
    },

    /// Dispatch ready auto-tasks to the agent gateway
    Run(cmd::run::RunArgs),

    /// Event-log maintenance: compact, rebuild, pull and resolve merges
    Sync(cmd::sync::SyncArgs),
}

fn main() -> Result<()> {
    trak::telemetry::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => cmd::init::run(),
        Commands::Add(args) => cmd::task::add(&args),
        Commands::List(args) => cmd::task::list(&args),
        Commands::Show { id } => cmd::task::show(&id),
        Commands::Status { id, status } => cmd::task::set_status(&id, &status),
        Commands::Assign { id, agent } => cmd::task::assign(&id, &agent),
        Commands::Log(args) => cmd::task::log(&args),
        Commands::Close(args) => cmd::close::run(&args),
        Commands::Fail { id, reason } => cmd::task::fail(&id, &reason),
        Commands::Retry { id, reset_count } => cmd::task::retry(&id, reset_count),
        Commands::Delete { id } => cmd::task::delete(&id),
        Commands::Dep(args) => cmd::dep::run(&args),
        Commands::Ready(args) => cmd::query::ready(&args),
        Commands::Next(args) => cmd::query::next(&args),
        Commands::Heat(args) => cmd::query::heat(&args),
        Commands::Trace { id, depth } => cmd::query::trace(&id, depth),
        Commands::Claim { id, agent, model } => cmd::task::claim(&id, &agent, model.as_deref()),
        Commands::Release { id, agent } => cmd::task::release(&id, &agent),
        Commands::Lock(args) => cmd::lock::run(&args),
        Commands::Cost { id } => cmd::task::cost(&id),
        Commands::Run(args) => cmd::run::run(&args),
        Commands::Sync(args) => cmd::sync::run(&args),
    }
}
