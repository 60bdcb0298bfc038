//! Rolls task completions up into their job and decides when the job is done.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::debug;

use crate::db::{job_repo, task_repo};
use crate::error::Result;
use crate::model::{FailurePolicy, JobKind, JobRecord, JobStatus, TaskCounts, TaskRecord};

/// Applies one completed task to its job.
///
/// Must run in the same transaction as the task's status change. Returns the
/// finalized job when this completion was the one that ended it.
pub fn apply_completion(
    conn: &Connection,
    kind: JobKind,
    task: &TaskRecord,
    policy: FailurePolicy,
    now: DateTime<Utc>,
) -> Result<Option<JobRecord>> {
    let progress =
        job_repo::increment_completed(conn, kind, task.job_id, 1, task.size_contribution())?;
    let counts = task_repo::status_counts(conn, kind, task.job_id)?;

    debug!(
        job_id = task.job_id,
        completed = progress.num_tasks_completed,
        total = progress.num_tasks,
        failed = counts.failed,
        running = counts.running,
        "Applied task completion"
    );

    if !is_job_done(progress.all_completed(), &counts, policy) {
        return Ok(None);
    }

    // Leftover tasks of a fail-fast job never ran and do not count as completed.
    let skipped = if counts.submitted > 0 {
        task_repo::fail_unfinished(conn, kind, task.job_id, false)?
    } else {
        0
    };

    let (status, msg) = if counts.failed > 0 {
        (JobStatus::Failed, failure_message(&counts, skipped))
    } else {
        (JobStatus::Success, String::new())
    };

    job_repo::finalize(conn, kind, task.job_id, status, &msg, now).map(Some)
}

fn is_job_done(all_completed: bool, counts: &TaskCounts, policy: FailurePolicy) -> bool {
    if all_completed {
        return true;
    }
    policy.stops_on_failure() && counts.failed > 0 && counts.in_flight() == 0
}

fn failure_message(counts: &TaskCounts, skipped: usize) -> String {
    let mut msg = format!("{} of {} tasks failed", counts.failed, counts.total());
    if skipped > 0 {
        msg.push_str(&format!(", {skipped} not run"));
    }
    msg
}
