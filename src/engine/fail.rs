//! Failure accounting: backoff-scheduled retries and permanent failure.

use serde_json::json;

use crate::clock;
use crate::error::Result;
use crate::eventlog::{Event, EventOp};
use crate::model::{Status, Task};

use super::TaskEngine;

impl TaskEngine {
    /// Record a failed attempt.
    ///
    /// With retries remaining the task rewinds to `open` with a future
    /// `retry_after` taken from the backoff schedule (minutes, clamped to
    /// the last entry). Once `max_retries` is reached — or retry is
    /// disabled with `max_retries = 0` — the task lands in `failed`.
    ///
    /// # Errors
    /// [`crate::error::TrakError::NotFound`] and store failures.
    pub fn fail(&self, needle: &str, reason: &str) -> Result<Task> {
        let mut task = self.resolve(needle)?;
        let now = clock::now();
        let new_count = task.retry_count + 1;
        let old_status = task.status;

        task.retry_count = new_count;
        task.last_failure_reason = Some(reason.to_owned());
        task.updated_at.clone_from(&now);

        let journal_line;
        if task.max_retries > 0 && new_count < task.max_retries {
            let schedule = &self.config().retry.backoff_minutes;
            let idx = usize::try_from(new_count - 1).unwrap_or(0);
            let minutes = schedule
                .get(idx.min(schedule.len().saturating_sub(1)))
                .copied()
                .unwrap_or(1);
            task.status = Status::Open;
            task.retry_after = Some(clock::now_plus_minutes(minutes));
            journal_line = format!(
                "Attempt {new_count}/{} failed: {reason} — retrying in {minutes}m",
                task.max_retries
            );
        } else {
            task.status = Status::Failed;
            task.retry_after = None;
            journal_line = format!("Failed permanently after {new_count} attempt(s): {reason}");
        }

        let tx = self.store().begin()?;
        self.store().update_task(&task)?;
        if old_status != task.status {
            self.system_journal(
                task.id.as_str(),
                &now,
                &format!("Status: {old_status} → {}", task.status),
            )?;
        }
        self.system_journal(task.id.as_str(), &now, &journal_line)?;
        tx.commit()?;

        self.emit(&Event::new(
            EventOp::Update,
            task.id.as_str(),
            &now,
            json!({
                "status": task.status.as_str(),
                "retry_count": task.retry_count,
                "last_failure_reason": task.last_failure_reason,
                "retry_after": task.retry_after,
            }),
        ));
        self.autocommit(&format!("trak: fail {}", task.id));
        Ok(task)
    }

    /// Manually put a failed or backed-off task back in play.
    ///
    /// # Errors
    /// [`crate::error::TrakError::NotFound`] and store failures.
    pub fn retry(&self, needle: &str, reset_count: bool) -> Result<Task> {
        let mut task = self.resolve(needle)?;
        let now = clock::now();
        let old_status = task.status;

        task.status = Status::Open;
        task.retry_after = None;
        task.last_failure_reason = None;
        if reset_count {
            task.retry_count = 0;
        }
        task.updated_at.clone_from(&now);

        let tx = self.store().begin()?;
        self.store().update_task(&task)?;
        if old_status != Status::Open {
            self.system_journal(
                task.id.as_str(),
                &now,
                &format!("Status: {old_status} → open"),
            )?;
        }
        self.system_journal(task.id.as_str(), &now, "Manual retry")?;
        tx.commit()?;

        self.emit(&Event::new(
            EventOp::Update,
            task.id.as_str(),
            &now,
            json!({
                "status": "open",
                "retry_after": null,
                "last_failure_reason": null,
                "retry_count": task.retry_count,
            }),
        ));
        self.autocommit(&format!("trak: retry {}", task.id));
        Ok(task)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::engine;
    use crate::engine::CreateOptions;

    #[test]
    fn fail_cycles_back_to_open_with_backoff() {
        let (e, _tmp) = engine();
        let task = e.create("flaky", &CreateOptions::default()).expect("create");

        let t1 = e.fail(task.id.as_str(), "r1").expect("fail");
        assert_eq!(t1.status, Status::Open);
        assert_eq!(t1.retry_count, 1);
        assert_eq!(t1.last_failure_reason.as_deref(), Some("r1"));
        let after1 = t1.retry_after.clone().expect("retry_after set");
        assert!(after1 > clock::now());

        let t2 = e.fail(task.id.as_str(), "r2").expect("fail");
        assert_eq!(t2.status, Status::Open);
        assert_eq!(t2.retry_count, 2);
        // Second backoff step (5m) lands after the first (1m).
        assert!(t2.retry_after.expect("retry_after") > after1);
    }

    #[test]
    fn third_failure_is_permanent_at_default_max() {
        let (e, _tmp) = engine();
        let task = e.create("doomed", &CreateOptions::default()).expect("create");
        e.fail(task.id.as_str(), "r1").expect("fail");
        e.fail(task.id.as_str(), "r2").expect("fail");
        let t3 = e.fail(task.id.as_str(), "r3").expect("fail");

        assert_eq!(t3.status, Status::Failed);
        assert_eq!(t3.retry_count, 3);
        assert!(t3.retry_after.is_none());

        let journal = e.store().journal_for(task.id.as_str()).expect("journal");
        assert!(journal.iter().any(|j| j.entry.contains("Failed permanently")));
    }

    #[test]
    fn zero_max_retries_disables_retry() {
        let (e, _tmp) = engine();
        let task = e
            .create(
                "one-shot",
                &CreateOptions { max_retries: Some(0), ..CreateOptions::default() },
            )
            .expect("create");
        let failed = e.fail(task.id.as_str(), "boom").expect("fail");
        assert_eq!(failed.status, Status::Failed);
    }

    #[test]
    fn backoff_clamps_to_last_entry() {
        let (e, _tmp) = engine();
        let task = e
            .create(
                "persistent",
                &CreateOptions { max_retries: Some(10), ..CreateOptions::default() },
            )
            .expect("create");
        // Seven failures walk past the end of the default schedule without
        // panicking; task is still retryable.
        for n in 1..=7 {
            let t = e.fail(task.id.as_str(), &format!("r{n}")).expect("fail");
            assert_eq!(t.status, Status::Open, "failure {n}");
        }
    }

    #[test]
    fn manual_retry_clears_failure_state() {
        let (e, _tmp) = engine();
        let task = e.create("flaky", &CreateOptions::default()).expect("create");
        e.fail(task.id.as_str(), "r1").expect("fail");

        let t = e.retry(task.id.as_str(), false).expect("retry");
        assert_eq!(t.status, Status::Open);
        assert!(t.retry_after.is_none());
        assert!(t.last_failure_reason.is_none());
        assert_eq!(t.retry_count, 1);

        let t = e.retry(task.id.as_str(), true).expect("retry reset");
        assert_eq!(t.retry_count, 0);
    }

    #[test]
    fn retry_count_invariant_holds() {
        let (e, _tmp) = engine();
        let task = e.create("inv", &CreateOptions::default()).expect("create");
        for reason in ["a", "b", "c", "d"] {
            let t = e.fail(task.id.as_str(), reason).expect("fail");
            assert!(
                t.retry_count <= t.max_retries || t.status == Status::Failed,
                "retry_count {} exceeds max {} while {}",
                t.retry_count,
                t.max_retries,
                t.status
            );
        }
    }
}
