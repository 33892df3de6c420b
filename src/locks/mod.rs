//! Workspace lock manager.
//!
//! All lock state is file-based so multiple processes on one host
//! cooperate without a daemon. Each repo hashes to a 12-hex-char name
//! under `<trak-dir>/locks/`:
//!
//! ```text
//! locks/<hash>.lock             primary lock for the repo
//! locks/<hash>-<task>.lock      additional non-overlapping file locks
//! locks/<hash>.queue            pending requests (priority then FIFO)
//! locks/audit.jsonl             append-only transition history
//! ```
//!
//! Reads auto-expire stale locks (past expiry, or holder pid gone) as a
//! side-effect. Operations are single open/read/close calls — there is an
//! accepted TOCTOU window between read and write, with the audit log as
//! the recovery record when it matters.

pub mod audit;
pub mod overlap;
pub mod queue;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::clock;
use crate::error::Result;

pub use audit::{AuditAction, AuditEvent, AuditLog};
pub use queue::QueueEntry;

// ---------------------------------------------------------------------------
// Lock types
// ---------------------------------------------------------------------------

/// Whether a lock guards the whole repo or a file-pattern set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockType {
    /// Whole-repo reservation (empty pattern set).
    #[default]
    Repo,
    /// Pattern-scoped reservation.
    Files,
}

/// One workspace reservation, serialized as the lock file contents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lock {
    /// The task holding the lock.
    pub task_id: String,
    /// Absolute path of the guarded repo.
    pub repo_path: String,
    /// Guarded patterns; empty means the whole repo.
    #[serde(default)]
    pub files: Vec<String>,
    /// When the lock was taken.
    pub timestamp: String,
    /// Holder process id (dead holders auto-expire).
    pub pid: u32,
    /// Holder agent label.
    pub agent: String,
    /// When the lock lapses without renewal.
    pub expires_at: String,
    /// Repo-wide or file-scoped.
    #[serde(default)]
    pub lock_type: LockType,
}

/// Which rule refused an acquire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictKind {
    /// The repo as a whole is reserved (or was requested whole).
    Repo,
    /// File patterns collide.
    Files,
}

/// Details of a refused acquire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockConflict {
    /// Repo-level or file-level collision.
    pub kind: ConflictKind,
    /// The lock that stood in the way.
    pub holder: Lock,
    /// The colliding patterns (file-level conflicts only).
    pub overlapping: Vec<String>,
}

/// Result of [`LockManager::acquire`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The lock is held; here is its current state.
    Acquired(Lock),
    /// Refused.
    Conflict(LockConflict),
}

/// Result of [`LockManager::acquire_or_queue`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueOutcome {
    /// The lock is held.
    Acquired(Lock),
    /// Parked behind the holder.
    Queued {
        /// Zero-based queue slot.
        position: usize,
        /// Who holds the lock now.
        holder: Lock,
        /// Colliding patterns, when the conflict was file-level.
        conflicting: Vec<String>,
    },
    /// The task was already waiting.
    AlreadyQueued {
        /// Zero-based queue slot.
        position: usize,
    },
}

// ---------------------------------------------------------------------------
// LockManager
// ---------------------------------------------------------------------------

/// File-based lock manager rooted at one `locks/` directory.
#[derive(Clone, Debug)]
pub struct LockManager {
    locks_dir: PathBuf,
    timeout_minutes: i64,
    audit: AuditLog,
}

impl LockManager {
    /// Bind to `locks_dir` with the configured expiry.
    #[must_use]
    pub fn new(locks_dir: PathBuf, timeout_minutes: i64) -> Self {
        let audit = AuditLog::new(locks_dir.join("audit.jsonl"));
        Self { locks_dir, timeout_minutes, audit }
    }

    /// The audit trail.
    #[must_use]
    pub const fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Try to take (or re-take) a lock on `repo` for `task`.
    ///
    /// # Errors
    /// I/O failures; a refusal is an [`AcquireOutcome::Conflict`], not an
    /// error.
    pub fn acquire(
        &self,
        repo: &Path,
        task: &str,
        agent: &str,
        files: &[String],
    ) -> Result<AcquireOutcome> {
        fs::create_dir_all(&self.locks_dir)?;
        let repo = canonical_repo(repo);
        let repo_str = repo.to_string_lossy().into_owned();
        let hash = repo_hash(&repo);
        let live = self.live_locks(&hash)?;

        // Re-acquire by the same task refreshes expiry and merges pattern
        // sets; an empty set on either side widens to the whole repo.
        if let Some((path, existing)) = live.iter().find(|(_, l)| l.task_id == task) {
            let merged = if existing.files.is_empty() || files.is_empty() {
                Vec::new()
            } else {
                let mut union = existing.files.clone();
                for f in files {
                    if !union.contains(f) {
                        union.push(f.clone());
                    }
                }
                union
            };
            let lock = self.build_lock(task, &repo_str, merged, agent);
            self.write_lock(path, &lock)?;
            self.audit.record(
                &AuditEvent::now(AuditAction::Acquire, &repo_str)
                    .task(task)
                    .agent(agent)
                    .detail("re-acquired"),
            );
            self.drop_from_queue(&hash, &repo_str, task)?;
            return Ok(AcquireOutcome::Acquired(lock));
        }

        for (_, holder) in &live {
            if let Some(conflict) = conflict_with(holder, files) {
                self.audit.record(
                    &AuditEvent::now(AuditAction::Conflict, &repo_str)
                        .task(task)
                        .agent(agent)
                        .detail(format!("held by {}", holder.task_id)),
                );
                return Ok(AcquireOutcome::Conflict(conflict));
            }
        }

        let lock = self.build_lock(task, &repo_str, files.to_vec(), agent);
        let primary = self.lock_path(&hash);
        let path = if live.iter().any(|(p, _)| *p == primary) {
            // Primary slot occupied by a non-overlapping files lock; this
            // one lives in a sibling file keyed by the task suffix.
            self.sibling_lock_path(&hash, task)
        } else {
            primary
        };
        self.write_lock(&path, &lock)?;
        self.audit.record(
            &AuditEvent::now(AuditAction::Acquire, &repo_str)
                .task(task)
                .agent(agent),
        );
        self.drop_from_queue(&hash, &repo_str, task)?;
        Ok(AcquireOutcome::Acquired(lock))
    }

    /// [`Self::acquire`], parking the request in the repo's queue when it
    /// conflicts.
    ///
    /// # Errors
    /// I/O failures.
    pub fn acquire_or_queue(
        &self,
        repo: &Path,
        task: &str,
        agent: &str,
        files: &[String],
        priority: i64,
    ) -> Result<QueueOutcome> {
        match self.acquire(repo, task, agent, files)? {
            AcquireOutcome::Acquired(lock) => Ok(QueueOutcome::Acquired(lock)),
            AcquireOutcome::Conflict(conflict) => {
                let repo = canonical_repo(repo);
                let repo_str = repo.to_string_lossy().into_owned();
                let hash = repo_hash(&repo);
                let queue_path = self.queue_path(&hash);
                let mut entries = queue::load(&queue_path)?;
                let entry = QueueEntry {
                    task_id: task.to_owned(),
                    agent: agent.to_owned(),
                    files: files.to_vec(),
                    requested_at: clock::now(),
                    priority,
                };
                let (position, added) = queue::enqueue(&mut entries, entry);
                if added {
                    queue::save(&queue_path, &entries)?;
                    self.audit.record(
                        &AuditEvent::now(AuditAction::Queue, &repo_str)
                            .task(task)
                            .agent(agent)
                            .detail(format!("position {position}")),
                    );
                    Ok(QueueOutcome::Queued {
                        position,
                        holder: conflict.holder,
                        conflicting: conflict.overlapping,
                    })
                } else {
                    Ok(QueueOutcome::AlreadyQueued { position })
                }
            }
        }
    }

    /// Release a lock on `repo`: the named task's lock, or the primary
    /// lock when no task is given. Returns the released lock, if any.
    /// The queue is not auto-promoted — waiting callers re-request.
    ///
    /// # Errors
    /// I/O failures.
    pub fn release(&self, repo: &Path, task: Option<&str>) -> Result<Option<Lock>> {
        let repo = canonical_repo(repo);
        let repo_str = repo.to_string_lossy().into_owned();
        let hash = repo_hash(&repo);
        let live = self.live_locks(&hash)?;

        let found = match task {
            Some(t) => live.into_iter().find(|(_, l)| l.task_id == t),
            None => {
                let primary = self.lock_path(&hash);
                live.into_iter().find(|(p, _)| *p == primary)
            }
        };
        let Some((path, lock)) = found else {
            return Ok(None);
        };
        fs::remove_file(&path)?;
        self.audit.record(
            &AuditEvent::now(AuditAction::Release, &repo_str)
                .task(&lock.task_id)
                .agent(&lock.agent),
        );
        Ok(Some(lock))
    }

    /// Force-remove every lock on `repo`, regardless of holder. Emergency
    /// recovery for stuck agents.
    ///
    /// # Errors
    /// I/O failures.
    pub fn break_locks(&self, repo: &Path, break_by: &str, reason: &str) -> Result<Vec<Lock>> {
        let repo = canonical_repo(repo);
        let repo_str = repo.to_string_lossy().into_owned();
        let hash = repo_hash(&repo);
        let mut broken = Vec::new();
        for (path, lock) in self.live_locks(&hash)? {
            fs::remove_file(&path)?;
            self.audit.record(
                &AuditEvent::now(AuditAction::Break, &repo_str)
                    .task(&lock.task_id)
                    .agent(break_by)
                    .detail(reason),
            );
            broken.push(lock);
        }
        Ok(broken)
    }

    /// Extend the holder's expiry by the configured timeout from now.
    /// Only the current holder may renew.
    ///
    /// # Errors
    /// A conflict error when `task` does not hold a lock on `repo`.
    pub fn renew(&self, repo: &Path, task: &str) -> Result<Lock> {
        let repo = canonical_repo(repo);
        let repo_str = repo.to_string_lossy().into_owned();
        let hash = repo_hash(&repo);
        let held = self
            .live_locks(&hash)?
            .into_iter()
            .find(|(_, l)| l.task_id == task);
        let Some((path, mut lock)) = held else {
            return Err(crate::error::TrakError::conflict(format!(
                "task {task} does not hold a lock on {repo_str}"
            )));
        };
        lock.expires_at = clock::now_plus_minutes(self.timeout_minutes);
        self.write_lock(&path, &lock)?;
        Ok(lock)
    }

    /// Every live lock under this manager, expiring stale ones on the way.
    ///
    /// # Errors
    /// I/O failures.
    pub fn list(&self) -> Result<Vec<Lock>> {
        let mut locks = Vec::new();
        let entries = match fs::read_dir(&self.locks_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(locks),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "lock")
                && let Some(lock) = self.read_live(&path)?
            {
                locks.push(lock);
            }
        }
        locks.sort_by(|a, b| a.repo_path.cmp(&b.repo_path).then_with(|| a.task_id.cmp(&b.task_id)));
        Ok(locks)
    }

    /// Live locks on one repo.
    ///
    /// # Errors
    /// I/O failures.
    pub fn locks_for(&self, repo: &Path) -> Result<Vec<Lock>> {
        let hash = repo_hash(&canonical_repo(repo));
        Ok(self.live_locks(&hash)?.into_iter().map(|(_, l)| l).collect())
    }

    /// The pending queue for one repo, in service order.
    ///
    /// # Errors
    /// I/O failures.
    pub fn queue_for(&self, repo: &Path) -> Result<Vec<QueueEntry>> {
        let hash = repo_hash(&canonical_repo(repo));
        queue::load(&self.queue_path(&hash))
    }

    // -- internals ----------------------------------------------------------

    fn build_lock(&self, task: &str, repo: &str, files: Vec<String>, agent: &str) -> Lock {
        let lock_type = if files.is_empty() { LockType::Repo } else { LockType::Files };
        Lock {
            task_id: task.to_owned(),
            repo_path: repo.to_owned(),
            files,
            timestamp: clock::now(),
            pid: std::process::id(),
            agent: agent.to_owned(),
            expires_at: clock::now_plus_minutes(self.timeout_minutes),
            lock_type,
        }
    }

    fn lock_path(&self, hash: &str) -> PathBuf {
        self.locks_dir.join(format!("{hash}.lock"))
    }

    fn sibling_lock_path(&self, hash: &str, task: &str) -> PathBuf {
        let suffix = task.rsplit('-').next().unwrap_or("x");
        self.locks_dir.join(format!("{hash}-{suffix}.lock"))
    }

    fn queue_path(&self, hash: &str) -> PathBuf {
        self.locks_dir.join(format!("{hash}.queue"))
    }

    fn write_lock(&self, path: &Path, lock: &Lock) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(lock)?)?;
        Ok(())
    }

    /// Lock files for one repo hash (primary and siblings), stale ones
    /// expired as a side-effect.
    fn live_locks(&self, hash: &str) -> Result<Vec<(PathBuf, Lock)>> {
        let mut live = Vec::new();
        let entries = match fs::read_dir(&self.locks_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(live),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with(hash) || !name.ends_with(".lock") {
                continue;
            }
            if let Some(lock) = self.read_live(&path)? {
                live.push((path, lock));
            }
        }
        live.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(live)
    }

    /// Read one lock file, deleting it (with an `expire` audit event) when
    /// it is past expiry or its holder is gone.
    fn read_live(&self, path: &Path) -> Result<Option<Lock>> {
        let raw = match fs::read_to_string(path) {
            Ok(r) => r,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Ok(lock) = serde_json::from_str::<Lock>(&raw) else {
            warn!(path = %path.display(), "unreadable lock file ignored");
            return Ok(None);
        };
        let stale = clock::has_elapsed(&lock.expires_at) || !pid_alive(lock.pid);
        if stale {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            self.audit.record(
                &AuditEvent::now(AuditAction::Expire, &lock.repo_path)
                    .task(&lock.task_id)
                    .agent(&lock.agent),
            );
            return Ok(None);
        }
        Ok(Some(lock))
    }

    fn drop_from_queue(&self, hash: &str, repo: &str, task: &str) -> Result<()> {
        let path = self.queue_path(hash);
        let mut entries = queue::load(&path)?;
        if queue::dequeue(&mut entries, task) {
            queue::save(&path, &entries)?;
            self.audit
                .record(&AuditEvent::now(AuditAction::Dequeue, repo).task(task));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// 12 hex chars of SHA-256 over the absolute repo path.
#[must_use]
pub fn repo_hash(repo: &Path) -> String {
    let digest = Sha256::digest(repo.to_string_lossy().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..12].to_owned()
}

fn canonical_repo(repo: &Path) -> PathBuf {
    if repo.is_absolute() {
        repo.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(repo))
            .unwrap_or_else(|_| repo.to_path_buf())
    }
}

/// Liveness probe for a holder pid. Hosts without `/proc` report alive —
/// expiry still bounds the lock's lifetime there.
fn pid_alive(pid: u32) -> bool {
    let proc_dir = Path::new("/proc");
    if proc_dir.is_dir() {
        proc_dir.join(pid.to_string()).exists()
    } else {
        true
    }
}

/// Apply the conflict decision table against one holder.
fn conflict_with(holder: &Lock, requested_files: &[String]) -> Option<LockConflict> {
    if holder.lock_type == LockType::Repo {
        return Some(LockConflict {
            kind: ConflictKind::Repo,
            holder: holder.clone(),
            overlapping: Vec::new(),
        });
    }
    if requested_files.is_empty() {
        // Whole-repo request against a files lock.
        return Some(LockConflict {
            kind: ConflictKind::Repo,
            holder: holder.clone(),
            overlapping: Vec::new(),
        });
    }
    let overlapping = overlap::overlapping_patterns(&holder.files, requested_files);
    if overlapping.is_empty() {
        None
    } else {
        Some(LockConflict {
            kind: ConflictKind::Files,
            holder: holder.clone(),
            overlapping,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
