//! Duration-string parsing for timeouts.
//!
//! Accepts humantime forms (`"30m"`, `"1h30m"`, `"90s"`) and bare integers
//! of seconds (`"900"`). Used by the timeout resolution chain and by
//! `lock.timeout` in the workspace config.

use std::time::Duration;

/// Parse a duration string or bare seconds count.
///
/// # Errors
/// Returns a description of the problem when the input is neither a bare
/// integer nor a humantime duration.
pub fn parse(s: &str) -> Result<Duration, String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err("empty duration".to_owned());
    }
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        let secs: u64 = trimmed
            .parse()
            .map_err(|e| format!("invalid seconds count '{trimmed}': {e}"))?;
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(trimmed).map_err(|e| format!("invalid duration '{trimmed}': {e}"))
}

/// Parse a duration string into whole seconds.
///
/// # Errors
/// Same as [`parse`].
pub fn parse_secs(s: &str) -> Result<u64, String> {
    parse(s).map(|d| d.as_secs())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
