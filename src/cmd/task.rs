//! Task lifecycle commands: add, list, show, status, assign, log, fail,
//! retry, delete, claim, release, cost.

use anyhow::Result;
use clap::Args;

use trak::cost::{self, BudgetState};
use trak::engine::{ClaimOutcome, CostAdditions, CreateOptions, LogOptions, TaskEngine};
use trak::model::{Autonomy, Status};
use trak::store::TaskFilter;

use super::summary_line;

// ---------------------------------------------------------------------------
// add
// ---------------------------------------------------------------------------

/// Arguments for `trak add`.
#[derive(Args, Debug)]
pub struct AddArgs {
    /// Task title
    pub title: String,

    /// Longer description
    #[arg(long, short = 'd')]
    pub desc: Option<String>,

    /// Project grouping
    #[arg(long, short = 'p')]
    pub project: Option<String>,

    /// Priority 0-3 (0 is highest)
    #[arg(long)]
    pub priority: Option<i64>,

    /// Comma-joined tags
    #[arg(long)]
    pub tags: Option<String>,

    /// Parent task id
    #[arg(long)]
    pub parent: Option<String>,

    /// Epic this task rolls up into
    #[arg(long)]
    pub epic: Option<String>,

    /// Create as an epic
    #[arg(long)]
    pub is_epic: bool,

    /// manual | auto | review | approve
    #[arg(long)]
    pub autonomy: Option<String>,

    /// USD budget ceiling
    #[arg(long)]
    pub budget: Option<f64>,

    /// Shell command the close gate must see exit 0
    #[arg(long = "verify-cmd")]
    pub verify_cmd: Option<String>,

    /// Dispatch timeout ("30m", "1h30m", "90s", or bare seconds)
    #[arg(long)]
    pub timeout: Option<String>,

    /// Attempt ceiling (0 disables retry)
    #[arg(long)]
    pub max_retries: Option<i64>,
}

pub fn add(args: &AddArgs) -> Result<()> {
    let engine = TaskEngine::open()?;
    let autonomy = match &args.autonomy {
        Some(raw) => Some(raw.parse::<Autonomy>().map_err(anyhow::Error::msg)?),
        None => None,
    };
    let timeout_seconds = match &args.timeout {
        Some(raw) => Some(trak::duration::parse_secs(raw).map_err(anyhow::Error::msg)?),
        None => None,
    };
    let task = engine.create(
        &args.title,
        &CreateOptions {
            description: args.desc.clone(),
            project: args.project.clone(),
            priority: args.priority,
            tags: args.tags.clone(),
            parent: args.parent.clone(),
            epic: args.epic.clone(),
            is_epic: args.is_epic,
            autonomy,
            budget_usd: args.budget,
            verify_command: args.verify_cmd.clone(),
            timeout_seconds,
            max_retries: args.max_retries,
            created_from: Some("cli".to_owned()),
            agent_session: std::env::var("TRAK_AGENT").ok().filter(|v| !v.is_empty()),
        },
    )?;
    println!("Created {}", summary_line(&task));
    Ok(())
}

// ---------------------------------------------------------------------------
// list / show
// ---------------------------------------------------------------------------

/// Arguments for `trak list`.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only this status
    #[arg(long)]
    pub status: Option<String>,

    /// Only this project
    #[arg(long, short = 'p')]
    pub project: Option<String>,

    /// Include done and archived tasks
    #[arg(long, short = 'a')]
    pub all: bool,
}

pub fn list(args: &ListArgs) -> Result<()> {
    let engine = TaskEngine::open()?;
    let status = match &args.status {
        Some(raw) => Some(raw.parse::<Status>().map_err(anyhow::Error::msg)?),
        None => None,
    };
    let tasks = engine.store().list_tasks(&TaskFilter {
        status,
        project: args.project.clone(),
        include_closed: args.all,
    })?;
    if tasks.is_empty() {
        println!("No matching tasks.");
        return Ok(());
    }
    for task in &tasks {
        println!("{}", summary_line(task));
    }
    Ok(())
}

pub fn show(id: &str) -> Result<()> {
    let engine = TaskEngine::open()?;
    let task = engine.resolve(id)?;

    println!("{}", summary_line(&task));
    if !task.description.is_empty() {
        println!("\n{}", task.description);
    }
    println!("\ncreated:  {}", task.created_at);
    println!("updated:  {}", task.updated_at);
    println!("autonomy: {}", task.autonomy);
    if !task.tags.is_empty() {
        println!("tags:     {}", task.tags);
    }
    if let Some(parent) = &task.parent_id {
        println!("parent:   {parent}");
    }
    if let Some(epic) = &task.epic_id {
        println!("epic:     {epic}");
    }
    if let Some(cmd) = &task.verify_command {
        println!("verify:   {cmd}");
    }
    if task.verification_status != trak::model::VerificationStatus::Unset {
        println!("verified: {}", task.verification_status);
    }
    if let Some(reason) = &task.last_failure_reason {
        println!(
            "retries:  {}/{} (last failure: {reason})",
            task.retry_count, task.max_retries
        );
    }
    if let Some(after) = &task.retry_after {
        println!("retry after: {after}");
    }
    let budget = cost::budget_status(&task);
    if budget.state != BudgetState::NoBudget {
        println!(
            "budget:   ${:.2} of ${:.2} ({})",
            budget.spent,
            budget.budget.unwrap_or_default(),
            budget.state
        );
    } else if task.cost_usd > 0.0 {
        println!("spent:    ${:.4}", task.cost_usd);
    }

    if !task.deps.is_empty() {
        let blockers = trak::graph::incomplete_parents(engine.store(), task.id.as_str())?;
        println!("\ndepends on:");
        for dep in &task.deps {
            let state = if blockers.iter().any(|b| b.id.as_str() == dep) {
                "  (incomplete)"
            } else {
                ""
            };
            println!("  {dep}{state}");
        }
    }
    if !task.claims.is_empty() {
        println!("\nclaims:");
        for claim in &task.claims {
            println!(
                "  {} {} at {}",
                claim.agent, claim.status, claim.claimed_at
            );
        }
    }
    if !task.journal.is_empty() {
        println!("\njournal:");
        for entry in &task.journal {
            println!("  {} [{}] {}", entry.timestamp, entry.author, entry.entry);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// status / assign
// ---------------------------------------------------------------------------

pub fn set_status(id: &str, status: &str) -> Result<()> {
    let status = status.parse::<Status>().map_err(anyhow::Error::msg)?;
    let engine = TaskEngine::open()?;
    let task = engine.set_status(id, status)?;
    println!("{} → {}", task.id, task.status);
    Ok(())
}

pub fn assign(id: &str, agent: &str) -> Result<()> {
    let engine = TaskEngine::open()?;
    let task = engine.assign(id, agent)?;
    println!("{} assigned to {agent} ({})", task.id, task.status);
    Ok(())
}

// ---------------------------------------------------------------------------
// log
// ---------------------------------------------------------------------------

/// Arguments for `trak log`.
#[derive(Args, Debug)]
pub struct LogArgs {
    /// Task id or unique suffix
    pub id: String,

    /// The journal entry
    pub entry: String,

    /// Author label (default: $TRAK_AGENT, then "human")
    #[arg(long)]
    pub author: Option<String>,

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

pub fn log(args: &LogArgs) -> Result<()> {
    let engine = TaskEngine::open()?;
    let task = engine.add_log(
        &args.id,
        &args.entry,
        &LogOptions {
            author: args.author.clone(),
            cost: CostAdditions {
                cost_usd: args.cost,
                tokens_in: args.tokens_in,
                tokens_out: args.tokens_out,
                model: args.model.clone(),
                duration_seconds: args.duration,
            },
        },
    )?;
    println!("Logged to {}", task.id);
    Ok(())
}

// ---------------------------------------------------------------------------
// fail / retry / delete
// ---------------------------------------------------------------------------

pub fn fail(id: &str, reason: &str) -> Result<()> {
    let engine = TaskEngine::open()?;
    let task = engine.fail(id, reason)?;
    match task.status {
        Status::Failed => println!(
            "{} failed permanently after {} attempt(s)",
            task.id, task.retry_count
        ),
        _ => println!(
            "{} attempt {}/{} failed; retrying after {}",
            task.id,
            task.retry_count,
            task.max_retries,
            task.retry_after.as_deref().unwrap_or("-")
        ),
    }
    Ok(())
}

pub fn retry(id: &str, reset_count: bool) -> Result<()> {
    let engine = TaskEngine::open()?;
    let task = engine.retry(id, reset_count)?;
    println!("{} back to open (retry count {})", task.id, task.retry_count);
    Ok(())
}

pub fn delete(id: &str) -> Result<()> {
    let engine = TaskEngine::open()?;
    let task = engine.delete(id)?;
    println!("Deleted {} ({})", task.id, task.title);
    Ok(())
}

// ---------------------------------------------------------------------------
// claim / release
// ---------------------------------------------------------------------------

pub fn claim(id: &str, agent: &str, model: Option<&str>) -> Result<()> {
    let engine = TaskEngine::open()?;
    match engine.claim(id, agent, model)? {
        ClaimOutcome::Claimed(task) => {
            println!("{} claimed by {agent}", task.id);
            Ok(())
        }
        ClaimOutcome::AlreadyClaimed { task, holder } => {
            println!("warning: {} already claimed by {holder}; claim unchanged", task.id);
            Ok(())
        }
    }
}

pub fn release(id: &str, agent: &str) -> Result<()> {
    let engine = TaskEngine::open()?;
    if engine.release_claim(id, agent)? {
        println!("Released claim on behalf of {agent}");
    } else {
        println!("No active claim by {agent}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// cost
// ---------------------------------------------------------------------------

pub fn cost(id: &str) -> Result<()> {
    let engine = TaskEngine::open()?;
    let task = engine.resolve(id)?;
    let events = engine.store().cost_events_for(task.id.as_str())?;

    println!("{}", summary_line(&task));
    println!(
        "\ntotal: ${:.4}  tokens: {} in / {} out  duration: {:.0}s",
        task.cost_usd, task.tokens_in, task.tokens_out, task.duration_seconds
    );
    if let Some(model) = &task.model_used {
        println!("model: {model}");
    }
    let budget = cost::budget_status(&task);
    match budget.state {
        BudgetState::NoBudget => {}
        state => println!(
            "budget: ${:.2} of ${:.2} ({state})",
            budget.spent,
            budget.budget.unwrap_or_default()
        ),
    }
    if events.is_empty() {
        println!("\nno cost events recorded");
        return Ok(());
    }
    println!("\nevents:");
    for ev in &events {
        println!(
            "  {}  ${:.4}  {} in / {} out  {}{}",
            ev.timestamp,
            ev.cost_usd,
            ev.tokens_in,
            ev.tokens_out,
            ev.model.as_deref().unwrap_or("-"),
            ev.operation
                .as_deref()
                .map(|op| format!("  [{op}]"))
                .unwrap_or_default(),
        );
    }
    Ok(())
}
