//! Shared test helpers for trak integration tests.
//!
//! All tests use temp directories — no side effects on any real
//! workspace. Each test gets its own repo (plain directory, or a git repo
//! when the scenario needs commits) with `trak init` already run.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

/// Create a temp directory with a trak workspace initialized.
pub fn setup_workspace() -> TempDir {
    let dir = TempDir::new().expect("failed to create temp dir");
    trak_ok(dir.path(), &["init"]);
    dir
}

/// Create a temp git repository (one initial commit) with a trak
/// workspace. Panics if git is unavailable — scenarios that need commits
/// can't run without it.
pub fn setup_git_workspace() -> TempDir {
    let dir = TempDir::new().expect("failed to create temp dir");
    git(dir.path(), &["init", "-q"]);
    git(dir.path(), &["config", "user.email", "trak-tests@example.invalid"]);
    git(dir.path(), &["config", "user.name", "trak tests"]);
    std::fs::write(dir.path().join("README.md"), "# test repo\n").expect("write");
    git(dir.path(), &["add", "."]);
    git(dir.path(), &["commit", "-q", "-m", "initial commit"]);
    trak_ok(dir.path(), &["init"]);
    dir
}

/// Run a git command, asserting success.
pub fn git(dir: &Path, args: &[&str]) {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        out.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&out.stderr)
    );
}

/// Run trak in `dir`, returning the raw output.
pub fn trak_in(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_trak"))
        .args(args)
        .current_dir(dir)
        .env_remove("TRAK_DB")
        .env_remove("TRAK_AGENT")
        .output()
        .expect("failed to execute trak")
}

/// Run trak and assert it succeeds. Returns stdout.
pub fn trak_ok(dir: &Path, args: &[&str]) -> String {
    let out = trak_in(dir, args);
    let stdout = String::from_utf8_lossy(&out.stdout);
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(
        out.status.success(),
        "trak {} failed:\nstdout: {stdout}\nstderr: {stderr}",
        args.join(" "),
    );
    stdout.to_string()
}

/// Run trak and assert it fails (exit code 1). Returns stderr.
pub fn trak_err(dir: &Path, args: &[&str]) -> String {
    let out = trak_in(dir, args);
    let stdout = String::from_utf8_lossy(&out.stdout);
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(
        !out.status.success(),
        "trak {} unexpectedly succeeded:\nstdout: {stdout}",
        args.join(" "),
    );
    format!("{stdout}{stderr}")
}

/// Create a task and return its id.
pub fn create_task(dir: &Path, title: &str, extra: &[&str]) -> String {
    let mut args = vec!["add", title];
    args.extend_from_slice(extra);
    let stdout = trak_ok(dir, &args);
    extract_id(&stdout)
}

/// Pull the first task id out of command output.
pub fn extract_id(output: &str) -> String {
    output
        .split_whitespace()
        .find(|w| w.starts_with("trak-") && w.len() == 11)
        .unwrap_or_else(|| panic!("no task id in output: {output}"))
        .to_string()
}
