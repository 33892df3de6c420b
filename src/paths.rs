//! Workspace discovery — where the `.trak/` directory lives.
//!
//! Resolution order:
//! 1. `TRAK_DB` environment variable (a `.trak` directory, or a `trak.db`
//!    file whose parent is used).
//! 2. Walk from the current working directory up to the enclosing git root,
//!    stopping at the first directory containing `.trak/`.
//! 3. The global `~/.trak/`.
//!
//! Commands other than `init` fail with [`TrakError::InitRequired`] when
//! none of these exist.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Result, TrakError};

/// Name of the workspace directory.
pub const TRAK_DIR: &str = ".trak";

/// Environment variable overriding workspace discovery.
pub const ENV_OVERRIDE: &str = "TRAK_DB";

// ---------------------------------------------------------------------------
// TrakPaths
// ---------------------------------------------------------------------------

/// Resolved locations of everything under one `.trak/` directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrakPaths {
    root: PathBuf,
}

impl TrakPaths {
    /// Wrap an existing (or about-to-be-created) `.trak` directory.
    #[must_use]
    pub fn at(root: PathBuf) -> Self {
        Self { root }
    }

    /// The `.trak` directory itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The relational store file.
    #[must_use]
    pub fn db(&self) -> PathBuf {
        self.root.join("trak.db")
    }

    /// The append-only event log.
    #[must_use]
    pub fn event_log(&self) -> PathBuf {
        self.root.join("trak.jsonl")
    }

    /// The lock directory (lock files, queue files, audit log).
    #[must_use]
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    /// Optional workspace configuration.
    #[must_use]
    pub fn config(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// The `.gitignore` written by `init` (ignores the store, keeps the log).
    #[must_use]
    pub fn gitignore(&self) -> PathBuf {
        self.root.join(".gitignore")
    }

    /// The project directory containing `.trak`, when there is one.
    #[must_use]
    pub fn project_root(&self) -> Option<&Path> {
        self.root.parent()
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Find the workspace for the current process.
///
/// # Errors
/// [`TrakError::InitRequired`] when no workspace exists anywhere on the
/// search path.
pub fn resolve() -> Result<TrakPaths> {
    resolve_from(&env::current_dir()?)
}

/// Find the workspace starting from an explicit directory (test seam).
///
/// # Errors
/// [`TrakError::InitRequired`] when no workspace exists.
pub fn resolve_from(cwd: &Path) -> Result<TrakPaths> {
    if let Some(paths) = override_from_env() {
        return Ok(paths);
    }
    if let Some(paths) = find_in_ancestors(cwd) {
        return Ok(paths);
    }
    if let Some(home) = dirs::home_dir() {
        let global = home.join(TRAK_DIR);
        if global.is_dir() {
            return Ok(TrakPaths::at(global));
        }
    }
    Err(TrakError::InitRequired)
}

/// Where `init` should create the workspace: the enclosing git root when
/// inside a repository, otherwise the current directory.
///
/// # Errors
/// Propagates failure to read the current directory.
pub fn init_target() -> Result<TrakPaths> {
    if let Some(paths) = override_from_env() {
        return Ok(paths);
    }
    let cwd = env::current_dir()?;
    let base = git_root(&cwd).unwrap_or(cwd);
    Ok(TrakPaths::at(base.join(TRAK_DIR)))
}

fn override_from_env() -> Option<TrakPaths> {
    let raw = env::var(ENV_OVERRIDE).ok().filter(|v| !v.is_empty())?;
    let path = PathBuf::from(raw);
    // Accept either the directory or the trak.db file inside it.
    if path.extension().is_some_and(|e| e == "db") {
        path.parent().map(|p| TrakPaths::at(p.to_path_buf()))
    } else {
        Some(TrakPaths::at(path))
    }
}

/// Walk `cwd` and its ancestors looking for `.trak/`, stopping after the
/// first directory that is itself a git root.
fn find_in_ancestors(cwd: &Path) -> Option<TrakPaths> {
    for dir in cwd.ancestors() {
        let candidate = dir.join(TRAK_DIR);
        if candidate.is_dir() {
            return Some(TrakPaths::at(candidate));
        }
        if dir.join(".git").exists() {
            // The enclosing repository root is the search boundary.
            return None;
        }
    }
    None
}

/// The nearest ancestor of `start` containing `.git`, if any.
#[must_use]
pub fn git_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn paths_are_rooted_in_trak_dir() {
        let p = TrakPaths::at(PathBuf::from("/repo/.trak"));
        assert_eq!(p.db(), PathBuf::from("/repo/.trak/trak.db"));
        assert_eq!(p.event_log(), PathBuf::from("/repo/.trak/trak.jsonl"));
        assert_eq!(p.locks_dir(), PathBuf::from("/repo/.trak/locks"));
        assert_eq!(p.project_root(), Some(Path::new("/repo")));
    }

    #[test]
    fn finds_trak_dir_in_parent() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        fs::create_dir(root.join(TRAK_DIR)).expect("mkdir .trak");
        let nested = root.join("src/deep");
        fs::create_dir_all(&nested).expect("mkdir nested");

        let found = resolve_from(&nested).expect("resolved");
        assert_eq!(found.root(), root.join(TRAK_DIR));
    }

    #[test]
    fn stops_at_git_root() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        // .trak lives above the git root — must not be found.
        fs::create_dir(root.join(TRAK_DIR)).expect("mkdir .trak");
        let repo = root.join("repo");
        fs::create_dir_all(repo.join(".git")).expect("mkdir .git");
        let nested = repo.join("src");
        fs::create_dir_all(&nested).expect("mkdir src");

        assert!(find_in_ancestors(&nested).is_none());
    }

    #[test]
    fn trak_dir_at_git_root_is_found() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let repo = tmp.path().join("repo");
        fs::create_dir_all(repo.join(".git")).expect("mkdir .git");
        fs::create_dir(repo.join(TRAK_DIR)).expect("mkdir .trak");
        let nested = repo.join("src");
        fs::create_dir_all(&nested).expect("mkdir src");

        let found = find_in_ancestors(&nested).expect("found");
        assert_eq!(found.root(), repo.join(TRAK_DIR));
    }

    #[test]
    fn git_root_walks_up() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let repo = tmp.path().join("repo");
        fs::create_dir_all(repo.join(".git")).expect("mkdir .git");
        let nested = repo.join("a/b");
        fs::create_dir_all(&nested).expect("mkdir nested");
        assert_eq!(git_root(&nested), Some(repo));
    }
}
