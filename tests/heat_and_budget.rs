//! Heat ordering and the budget gate.

mod common;
use common::*;

// -- heat (scenario S7) ------------------------------------------------------

#[test]
fn hub_with_dependents_outranks_its_leaves() {
    let repo = setup_workspace();
    let hub = create_task(repo.path(), "hub task", &["--priority", "3"]);
    let leaf_a = create_task(repo.path(), "leaf a", &[]);
    let leaf_b = create_task(repo.path(), "leaf b", &[]);
    trak_ok(repo.path(), &["dep", "add", &leaf_a, &hub]);
    trak_ok(repo.path(), &["dep", "add", &leaf_b, &hub]);

    let heat = trak_ok(repo.path(), &["heat"]);
    let hub_pos = heat.find(&hub).expect("hub listed");
    let leaf_pos = heat.find(&leaf_a).expect("leaf listed");
    assert!(hub_pos < leaf_pos, "hub should rank above leaves:\n{heat}");
}

#[test]
fn blocked_status_cools_a_task() {
    let repo = setup_workspace();
    let hot = create_task(repo.path(), "hot task", &["--priority", "2"]);
    let cooled = create_task(repo.path(), "cooled task", &["--priority", "2"]);
    trak_ok(repo.path(), &["status", &cooled, "blocked"]);

    let heat = trak_ok(repo.path(), &["heat"]);
    let hot_pos = heat.find(&hot).expect("hot listed");
    let cooled_pos = heat.find(&cooled).expect("cooled listed");
    assert!(hot_pos < cooled_pos, "blocked task should rank lower:\n{heat}");
}

// -- budget gate (scenario S8) -----------------------------------------------

#[test]
fn spend_past_budget_reports_exceeded() {
    let repo = setup_workspace();
    let id = create_task(
        repo.path(),
        "budgeted",
        &["--budget", "1.00", "--autonomy", "auto", "--priority", "0"],
    );

    trak_ok(repo.path(), &["log", &id, "first chunk", "--cost", "0.9"]);
    trak_ok(repo.path(), &["log", &id, "second chunk", "--cost", "0.6"]);

    let cost = trak_ok(repo.path(), &["cost", &id]);
    assert!(cost.contains("exceeded"));
    assert!(cost.contains("$1.50"));

    // The orchestrator's pool refuses the task even though it otherwise
    // qualifies (open, auto, P0).
    let out = trak_ok(repo.path(), &["run", "--dry-run"]);
    assert!(!out.contains(&id), "over-budget task must not dispatch:\n{out}");
}

#[test]
fn under_budget_auto_task_would_dispatch() {
    let repo = setup_workspace();
    let id = create_task(
        repo.path(),
        "affordable",
        &["--budget", "5.00", "--autonomy", "auto", "--priority", "0"],
    );
    trak_ok(repo.path(), &["log", &id, "cheap", "--cost", "0.5"]);

    let out = trak_ok(repo.path(), &["run", "--dry-run"]);
    assert!(out.contains(&id));
    let cost = trak_ok(repo.path(), &["cost", &id]);
    assert!(cost.contains("ok"));
}

#[test]
fn dry_run_respects_priority_window_and_autonomy() {
    let repo = setup_workspace();
    let p0 = create_task(repo.path(), "urgent auto", &["--autonomy", "auto", "--priority", "0"]);
    let p3 = create_task(repo.path(), "backlog auto", &["--autonomy", "auto", "--priority", "3"]);
    let manual = create_task(repo.path(), "manual urgent", &["--priority", "0"]);

    let out = trak_ok(repo.path(), &["run", "--dry-run"]);
    assert!(out.contains(&p0));
    assert!(!out.contains(&p3), "P3 outside default window:\n{out}");
    assert!(!out.contains(&manual), "manual tasks never dispatch:\n{out}");

    let out = trak_ok(repo.path(), &["run", "--dry-run", "--min-priority", "3"]);
    assert!(out.contains(&p3));
}

#[test]
fn dry_run_reports_effective_timeout() {
    let repo = setup_workspace();
    create_task(
        repo.path(),
        "timed",
        &["--autonomy", "auto", "--priority", "0", "--timeout", "20m"],
    );
    let out = trak_ok(repo.path(), &["run", "--dry-run"]);
    assert!(out.contains("timeout 1200s"));

    // CLI flag beats the per-task override.
    let out = trak_ok(repo.path(), &["run", "--dry-run", "--timeout", "90s"]);
    assert!(out.contains("timeout 90s"));
}

#[test]
fn log_cost_accumulates_counters() {
    let repo = setup_workspace();
    let id = create_task(repo.path(), "counted", &[]);
    trak_ok(
        repo.path(),
        &[
            "log", &id, "ran the suite",
            "--cost", "0.25",
            "--tokens-in", "1000",
            "--tokens-out", "500",
            "--model", "claude-opus-4-5",
            "--duration", "30",
        ],
    );

    let cost = trak_ok(repo.path(), &["cost", &id]);
    assert!(cost.contains("1000 in / 500 out"));
    assert!(cost.contains("claude-opus-4-5"));
    assert!(cost.contains("$0.2500"));
}
