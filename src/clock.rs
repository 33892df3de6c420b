//! Timestamp helpers.
//!
//! Every timestamp in trak is a `YYYY-MM-DD HH:MM:SS` string in UTC. The
//! format is lexicographically monotone, which the event-log merge resolver
//! relies on when it compares `updated_at` values as plain strings.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

/// The one timestamp format used everywhere.
pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current UTC time, formatted.
#[must_use]
pub fn now() -> String {
    format(Utc::now())
}

/// Format a `DateTime` in the canonical format.
#[must_use]
pub fn format(ts: DateTime<Utc>) -> String {
    ts.format(FORMAT).to_string()
}

/// Parse a canonical timestamp back into a `DateTime`.
///
/// Returns `None` for anything that does not match the format exactly.
#[must_use]
pub fn parse(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Current time plus `minutes`, formatted. Used for retry backoff and lock
/// expiry stamps.
#[must_use]
pub fn now_plus_minutes(minutes: i64) -> String {
    format(Utc::now() + Duration::minutes(minutes))
}

/// Whole days between `ts` and now; `None` if `ts` does not parse.
/// Clamped at zero for timestamps in the future.
#[must_use]
pub fn age_days(ts: &str) -> Option<i64> {
    let parsed = parse(ts)?;
    Some((Utc::now() - parsed).num_days().max(0))
}

/// True if `ts` is in the past (or does not parse, which we treat as
/// elapsed so a malformed `retry_after` can never wedge a task).
#[must_use]
pub fn has_elapsed(ts: &str) -> bool {
    parse(ts).is_none_or(|t| t <= Utc::now())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
