//! Workspace configuration (`.trak/config.toml`).
//!
//! Everything is optional; a missing file means all defaults. Timeouts are
//! duration strings (`"30m"`, `"900"`); the backoff schedule is minutes.
//!
//! ```toml
//! [defaults]
//! max_retries = 3
//!
//! [retry]
//! backoff_minutes = [1, 5, 15, 30, 60]
//!
//! [lock]
//! timeout = "30m"
//!
//! [agent]
//! timeout = "15m"
//! max_agents = 3
//! min_priority = 1
//!
//! [git]
//! autocommit = false
//!
//! [project.web]
//! timeout = "30m"
//!
//! [timeout.profile]
//! heavy = "1h"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, TrakError};

/// Fallback dispatch timeout when nothing in the chain matches.
pub const DEFAULT_TIMEOUT_SECS: u64 = 900;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level workspace configuration.
///
/// Parsed from `.trak/config.toml`. Missing fields use defaults; a missing
/// file is not an error.
#[derive(Clone, Debug, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TrakConfig {
    /// Task creation defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Retry/backoff settings.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Workspace lock settings.
    #[serde(default)]
    pub lock: LockConfig,

    /// Orchestrator/agent settings.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Git side-effect settings.
    #[serde(default)]
    pub git: GitConfig,

    /// Per-project overrides, keyed by project name.
    #[serde(default)]
    pub project: BTreeMap<String, ProjectConfig>,

    /// Tag-keyed timeout profiles.
    #[serde(default)]
    pub timeout: TimeoutConfig,
}

impl TrakConfig {
    /// Load the config file at `path`, or all defaults when it is absent.
    ///
    /// # Errors
    /// Returns a validation error naming the file when it exists but does
    /// not parse.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| {
            TrakError::validation(format!("config error in '{}': {e}", path.display()))
        })
    }

    /// Lock expiry as a [`Duration`]. Unparseable values fall back to the
    /// 30-minute default.
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        crate::duration::parse(&self.lock.timeout)
            .unwrap_or_else(|_| Duration::from_secs(30 * 60))
    }

    /// Lock expiry in whole minutes (lock files stamp expiry as minutes
    /// from acquisition).
    #[must_use]
    pub fn lock_timeout_minutes(&self) -> i64 {
        i64::try_from(self.lock_timeout().as_secs() / 60).unwrap_or(30)
    }

    /// The dispatch timeout for a task, walking the resolution chain:
    /// CLI flag, task override, project config, tag profile, global agent
    /// timeout, and finally [`DEFAULT_TIMEOUT_SECS`].
    #[must_use]
    pub fn resolve_timeout_secs(
        &self,
        cli_flag: Option<u64>,
        task_override: Option<u64>,
        project: Option<&str>,
        tags: &[&str],
    ) -> u64 {
        if let Some(secs) = cli_flag {
            return secs;
        }
        if let Some(secs) = task_override {
            return secs;
        }
        if let Some(secs) = project
            .and_then(|p| self.project.get(p))
            .and_then(|p| p.timeout.as_deref())
            .and_then(|t| crate::duration::parse_secs(t).ok())
        {
            return secs;
        }
        if let Some(secs) = tags
            .iter()
            .find_map(|tag| self.timeout.profile.get(*tag))
            .and_then(|t| crate::duration::parse_secs(t).ok())
        {
            return secs;
        }
        if let Some(secs) = self
            .agent
            .timeout
            .as_deref()
            .and_then(|t| crate::duration::parse_secs(t).ok())
        {
            return secs;
        }
        DEFAULT_TIMEOUT_SECS
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Task creation defaults.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfig {
    /// Attempt ceiling for new tasks; 0 disables retry.
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

const fn default_max_retries() -> i64 {
    3
}

/// Retry/backoff settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Backoff schedule in minutes, indexed by attempt number and clamped
    /// to the last entry.
    #[serde(default = "default_backoff_minutes")]
    pub backoff_minutes: Vec<i64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_minutes: default_backoff_minutes(),
        }
    }
}

fn default_backoff_minutes() -> Vec<i64> {
    vec![1, 5, 15, 30, 60]
}

/// Workspace lock settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockConfig {
    /// How long a lock lives without renewal (duration string).
    #[serde(default = "default_lock_timeout")]
    pub timeout: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: default_lock_timeout(),
        }
    }
}

fn default_lock_timeout() -> String {
    "30m".to_owned()
}

/// Orchestrator/agent settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Global dispatch timeout (duration string), consulted after project
    /// and tag-profile overrides.
    #[serde(default)]
    pub timeout: Option<String>,

    /// Bounded dispatch parallelism.
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,

    /// Only tasks at this priority or better dispatch (default 1: P0, P1).
    #[serde(default = "default_min_priority")]
    pub min_priority: i64,
}

const fn default_max_agents() -> usize {
    3
}

const fn default_min_priority() -> i64 {
    1
}

/// Git side-effect settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct GitConfig {
    /// Commit the event log after each mutation.
    #[serde(default)]
    pub autocommit: bool,
}

/// Per-project overrides.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Dispatch timeout for tasks in this project (duration string).
    #[serde(default)]
    pub timeout: Option<String>,
}

/// Tag-keyed timeout profiles.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Map of tag name to duration string.
    #[serde(default)]
    pub profile: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
