//! Dependency graph queries: readiness, blockers, heat, trace, and the
//! cycle guard.
//!
//! Everything here is read-only over the store. Readiness is computed on
//! demand — there is no incremental index to keep fresh.

use std::collections::{HashSet, VecDeque};

use crate::clock;
use crate::error::Result;
use crate::model::{Status, Task};
use crate::store::{Store, TaskFilter};

/// Depth bound for [`trace`] and the reverse-reachability cycle guard.
pub const MAX_TRACE_DEPTH: usize = 64;

// ---------------------------------------------------------------------------
// Readiness
// ---------------------------------------------------------------------------

/// True iff the task is `open`, every dependency parent is complete, and
/// any retry backoff has elapsed.
///
/// # Errors
/// Store failures.
pub fn ready(store: &Store, task: &Task) -> Result<bool> {
    if task.status != Status::Open {
        return Ok(false);
    }
    if let Some(after) = &task.retry_after
        && !clock::has_elapsed(after)
    {
        return Ok(false);
    }
    Ok(incomplete_parents(store, task.id.as_str())?.is_empty())
}

/// The incomplete parents holding a task back (empty when none).
///
/// # Errors
/// Store failures.
pub fn incomplete_parents(store: &Store, id: &str) -> Result<Vec<Task>> {
    let mut blockers = Vec::new();
    for parent_id in store.deps_of(id)? {
        match store.get_task(&parent_id)? {
            Some(parent) if parent.status.is_complete() => {}
            Some(parent) => blockers.push(parent),
            // Dangling edges can't normally exist (foreign keys cascade);
            // treat one as satisfied rather than wedging the task.
            None => {}
        }
    }
    Ok(blockers)
}

// ---------------------------------------------------------------------------
// Heat
// ---------------------------------------------------------------------------

/// Attention score for ordering non-ready work.
///
/// Combines fan-out (how much depends on this), age, journal recency, and
/// priority; explicitly `blocked` tasks are cooled. Never negative.
#[must_use]
pub fn heat(task: &Task, dependents: i64) -> i64 {
    let mut score = 2 * dependents;

    if !task.status.is_complete() {
        let age_weeks = clock::age_days(&task.created_at).unwrap_or(0) / 7;
        score += age_weeks.min(3);
    }

    if let Some(last) = task.journal.last() {
        match clock::age_days(&last.timestamp) {
            Some(0) => score += 2,
            Some(1 | 2) => score += 1,
            _ => {}
        }
    }

    score += task.priority;

    if task.status == Status::Blocked {
        score -= 2;
    }

    score.max(0)
}

/// Heat for every matching task, hottest first (ties broken by priority
/// then id for stable output).
///
/// # Errors
/// Store failures.
pub fn heat_map(store: &Store, filter: &TaskFilter) -> Result<Vec<(Task, i64)>> {
    let counts = store.dependent_counts()?;
    let mut scored = Vec::new();
    for mut task in store.list_tasks(filter)? {
        task.journal = store.journal_for(task.id.as_str())?;
        let dependents = counts.get(task.id.as_str()).copied().unwrap_or(0);
        let score = heat(&task, dependents);
        scored.push((task, score));
    }
    scored.sort_by(|(a, sa), (b, sb)| {
        sb.cmp(sa)
            .then_with(|| a.priority.cmp(&b.priority))
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(scored)
}

// ---------------------------------------------------------------------------
// Trace
// ---------------------------------------------------------------------------

/// One breadth-first level of a trace.
#[derive(Clone, Debug)]
pub struct TraceLevel {
    /// Distance from the root (1 = direct neighbor).
    pub depth: usize,
    /// Tasks at this distance.
    pub tasks: Vec<Task>,
}

/// Upstream (dependencies) and downstream (dependents) DAGs around a task.
#[derive(Clone, Debug, Default)]
pub struct Trace {
    /// What this task waits on, level by level.
    pub upstream: Vec<TraceLevel>,
    /// What waits on this task, level by level.
    pub downstream: Vec<TraceLevel>,
}

/// Walk both directions from `id` up to `depth` levels (clamped to
/// [`MAX_TRACE_DEPTH`]).
///
/// # Errors
/// Store failures.
pub fn trace(store: &Store, id: &str, depth: usize) -> Result<Trace> {
    let depth = depth.clamp(1, MAX_TRACE_DEPTH);
    Ok(Trace {
        upstream: walk(store, id, depth, Direction::Up)?,
        downstream: walk(store, id, depth, Direction::Down)?,
    })
}

#[derive(Clone, Copy)]
enum Direction {
    Up,
    Down,
}

fn walk(store: &Store, root: &str, depth: usize, dir: Direction) -> Result<Vec<TraceLevel>> {
    let mut levels = Vec::new();
    let mut seen: HashSet<String> = HashSet::from([root.to_owned()]);
    let mut frontier = vec![root.to_owned()];

    for d in 1..=depth {
        let mut next_ids = Vec::new();
        for id in &frontier {
            let neighbors = match dir {
                Direction::Up => store.deps_of(id)?,
                Direction::Down => store.dependents_of(id)?,
            };
            for n in neighbors {
                if seen.insert(n.clone()) {
                    next_ids.push(n);
                }
            }
        }
        if next_ids.is_empty() {
            break;
        }
        let mut tasks = Vec::new();
        for id in &next_ids {
            if let Some(task) = store.get_task(id)? {
                tasks.push(task);
            }
        }
        levels.push(TraceLevel { depth: d, tasks });
        frontier = next_ids;
    }
    Ok(levels)
}

// ---------------------------------------------------------------------------
// Cycle guard
// ---------------------------------------------------------------------------

/// Would adding the edge `child → parent` close a dependency cycle?
///
/// Runs a bounded reverse-reachability walk: if `child` is reachable from
/// `parent` by following `parent`'s own dependencies, the new edge would
/// complete a loop.
///
/// # Errors
/// Store failures.
pub fn would_cycle(store: &Store, child: &str, parent: &str) -> Result<bool> {
    if child == parent {
        return Ok(true);
    }
    let mut seen: HashSet<String> = HashSet::from([parent.to_owned()]);
    let mut queue: VecDeque<(String, usize)> = VecDeque::from([(parent.to_owned(), 0)]);

    while let Some((id, d)) = queue.pop_front() {
        if d >= MAX_TRACE_DEPTH {
            continue;
        }
        for upstream in store.deps_of(&id)? {
            if upstream == child {
                return Ok(true);
            }
            if seen.insert(upstream.clone()) {
                queue.push_back((upstream, d + 1));
            }
        }
    }
    Ok(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
