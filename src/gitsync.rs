//! Git side-effects: HEAD capture, proof-of-work queries, autocommit, pull.
//!
//! Everything here shells out to `git` and treats the repository as an
//! external collaborator — only the effects matter. The autocommit hook is
//! best-effort by contract: a failure is logged and swallowed so the
//! primary mutation never rolls back over a sync hiccup.

use std::path::Path;
use std::process::Command;

use tracing::debug;

/// Run git in `repo` and return trimmed stdout on success.
fn git(repo: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .ok()?;
    if !output.status.success() {
        debug!(?args, code = ?output.status.code(), "git command failed");
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_owned())
}

/// The current HEAD commit hash, if `repo` is inside a git repository with
/// at least one commit.
#[must_use]
pub fn head(repo: &Path) -> Option<String> {
    git(repo, &["rev-parse", "HEAD"]).filter(|s| !s.is_empty())
}

/// Does `hash` name an existing commit in `repo`?
#[must_use]
pub fn commit_exists(repo: &Path, hash: &str) -> bool {
    // cat-file -e exits zero iff the object exists and is a commit.
    Command::new("git")
        .args(["cat-file", "-e", &format!("{hash}^{{commit}}")])
        .current_dir(repo)
        .status()
        .is_ok_and(|s| s.success())
}

/// One-line subjects of commits since `base` (exclusive), newest first.
/// With `mention`, only commits whose message contains it. `base = None`
/// lists nothing — without a baseline there is no "since".
#[must_use]
pub fn commits_since(repo: &Path, base: Option<&str>, mention: Option<&str>) -> Vec<String> {
    let Some(base) = base else {
        return Vec::new();
    };
    let range = format!("{base}..HEAD");
    let mut args = vec!["log".to_owned(), "--oneline".to_owned(), range];
    if let Some(needle) = mention {
        args.push(format!("--grep={needle}"));
    }
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    git(repo, &args)
        .map(|out| out.lines().map(str::to_owned).collect())
        .unwrap_or_default()
}

/// Commit the event log (and the workspace `.gitignore`) after a mutation.
/// Silent on failure; never reentrant — the sync path itself writes no
/// events.
pub fn autocommit(trak_dir: &Path, message: &str) {
    let Some(repo) = trak_dir.parent() else {
        return;
    };
    let Some(dir_name) = trak_dir.file_name().and_then(|n| n.to_str()) else {
        return;
    };
    let log_rel = format!("{dir_name}/trak.jsonl");
    let ignore_rel = format!("{dir_name}/.gitignore");
    if git(repo, &["add", &log_rel, &ignore_rel]).is_none() {
        debug!("autocommit: git add failed, skipping");
        return;
    }
    if git(repo, &["commit", "-m", message, "--", &log_rel, &ignore_rel]).is_none() {
        // Usually just "nothing to commit".
        debug!("autocommit: git commit skipped");
    }
}

/// Pull the current branch. Returns git's combined output; `None` when the
/// pull failed outright (e.g. no remote). A pull that leaves conflict
/// markers in the event log still "succeeds" here — the merge resolver
/// handles the file contents afterwards.
#[must_use]
pub fn pull(repo: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["pull", "--no-edit"])
        .current_dir(repo)
        .output()
        .ok()?;
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    // A conflicted merge exits non-zero but still did the work we need.
    if output.status.success() || text.contains("CONFLICT") {
        Some(text)
    } else {
        debug!(code = ?output.status.code(), "git pull failed");
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
