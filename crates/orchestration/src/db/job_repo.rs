//! Job record store for both job kinds.
//!
//! Every function takes a `&Connection` so several calls can share one
//! transaction (see [`super::Database::with_tx`]). Status changes are
//! compare-and-set updates on the current status, so a change computed from
//! a stale read never lands.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::task_repo;
use crate::error::{OrchestrationError, Result};
use crate::model::{
    bounded_status_msg, elapsed_seconds, JobFilter, JobId, JobKind, JobProgress, JobRecord,
    JobStatus, JobSubmission, SizeTotals, MAX_BLOB_LEN,
};

const COMMON_COLUMNS: &str = "id, status, status_msg, creation_time, start_time, duration, \
     num_tasks, num_tasks_completed, binary_version, config";

fn select_columns(kind: JobKind) -> String {
    match kind {
        JobKind::Compression => {
            format!("{COMMON_COLUMNS}, original_size, uncompressed_size, compressed_size")
        }
        JobKind::Search => COMMON_COLUMNS.to_string(),
    }
}

fn from_row(kind: JobKind, row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let sizes = if kind.tracks_sizes() {
        Some(SizeTotals {
            original_size: row.get("original_size")?,
            uncompressed_size: row.get("uncompressed_size")?,
            compressed_size: row.get("compressed_size")?,
        })
    } else {
        None
    };

    Ok(JobRecord {
        id: row.get("id")?,
        kind,
        status: row.get("status")?,
        status_msg: row.get("status_msg")?,
        creation_time: row.get("creation_time")?,
        start_time: row.get("start_time")?,
        duration: row.get("duration")?,
        num_tasks: row.get("num_tasks")?,
        num_tasks_completed: row.get("num_tasks_completed")?,
        sizes,
        config: row.get("config")?,
        binary_version: row.get("binary_version")?,
    })
}

/// Inserts a job in SCHEDULING with no tasks and zeroed metrics.
pub fn create_job(
    conn: &Connection,
    kind: JobKind,
    submission: &JobSubmission,
    now: DateTime<Utc>,
) -> Result<JobId> {
    if submission.config.len() > MAX_BLOB_LEN {
        return Err(OrchestrationError::ConfigTooLarge {
            field: "config",
            size: submission.config.len(),
            limit: MAX_BLOB_LEN,
        });
    }

    conn.execute(
        &format!(
            "INSERT INTO {} (status, status_msg, creation_time, binary_version, config)
             VALUES (?1, '', ?2, ?3, ?4)",
            kind.jobs_table()
        ),
        params![
            JobStatus::Scheduling,
            now,
            submission.binary_version,
            submission.config
        ],
    )?;
    let id = conn.last_insert_rowid();

    log::debug!("Created {} job {}", kind, id);
    Ok(id)
}

/// Finds a job by its ID.
pub fn find_by_id(conn: &Connection, kind: JobKind, id: JobId) -> Result<Option<JobRecord>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM {} WHERE id = ?1",
                select_columns(kind),
                kind.jobs_table()
            ),
            params![id],
            |row| from_row(kind, row),
        )
        .optional()?;
    Ok(row)
}

/// Like [`find_by_id`], but a missing job is an error.
pub fn get(conn: &Connection, kind: JobKind, id: JobId) -> Result<JobRecord> {
    find_by_id(conn, kind, id)?.ok_or(OrchestrationError::NotFound { entity: "job", id })
}

/// Moves a job from SCHEDULING to RUNNING and stamps `start_time`.
///
/// Returns `false` without touching the row if the job is already RUNNING.
pub fn mark_started(conn: &Connection, kind: JobKind, id: JobId, now: DateTime<Utc>) -> Result<bool> {
    let changed = conn.execute(
        &format!(
            "UPDATE {} SET status = ?1, start_time = ?2 WHERE id = ?3 AND status = ?4",
            kind.jobs_table()
        ),
        params![JobStatus::Running, now, id, JobStatus::Scheduling],
    )?;
    if changed == 1 {
        log::debug!("{} job {} started", kind, id);
        return Ok(true);
    }

    let job = get(conn, kind, id)?;
    match job.status {
        JobStatus::Running => Ok(false),
        status => Err(OrchestrationError::invalid_transition(
            "job",
            id,
            status,
            JobStatus::Running,
        )),
    }
}

/// Moves a job to a terminal status, records `status_msg` and freezes
/// `duration`.
///
/// Fails with `InvalidTransition` if the job is already terminal, if the
/// transition is not allowed from the current status, or if SUCCESS is
/// requested while any of the job's tasks has not succeeded.
pub fn finalize(
    conn: &Connection,
    kind: JobKind,
    id: JobId,
    status: JobStatus,
    status_msg: &str,
    now: DateTime<Utc>,
) -> Result<JobRecord> {
    if !status.is_terminal() {
        return Err(OrchestrationError::InvalidInput(format!(
            "{status} is not a terminal job status"
        )));
    }

    let job = get(conn, kind, id)?;
    if !job.status.can_transition_to(status) {
        return Err(OrchestrationError::invalid_transition(
            "job", id, job.status, status,
        ));
    }

    if status == JobStatus::Success {
        let counts = task_repo::status_counts(conn, kind, id)?;
        if counts.total() == 0 || counts.succeeded != counts.total() {
            return Err(OrchestrationError::invalid_transition(
                "job", id, job.status, status,
            ));
        }
    }

    let duration = elapsed_seconds(job.start_time.unwrap_or(job.creation_time), now);
    let changed = conn.execute(
        &format!(
            "UPDATE {} SET status = ?1, status_msg = ?2, duration = ?3
             WHERE id = ?4 AND status = ?5",
            kind.jobs_table()
        ),
        params![status, bounded_status_msg(status_msg), duration, id, job.status],
    )?;
    if changed == 0 {
        let current = get(conn, kind, id)?;
        return Err(OrchestrationError::invalid_transition(
            "job",
            id,
            current.status,
            status,
        ));
    }

    log::info!(
        "{} job {} finalized as {} after {:.3}s",
        kind,
        id,
        status,
        duration
    );
    get(conn, kind, id)
}

/// Atomically adds `delta` completed tasks and the given size totals.
///
/// The increment is a single `UPDATE ... SET x = x + ?`, guarded so the
/// completed count can never pass `num_tasks` and terminal jobs are never
/// touched.
pub fn increment_completed(
    conn: &Connection,
    kind: JobKind,
    id: JobId,
    delta: i64,
    sizes: SizeTotals,
) -> Result<JobProgress> {
    if delta < 0 {
        return Err(OrchestrationError::InvalidInput(
            "completed task delta must not be negative".into(),
        ));
    }
    if sizes.original_size < 0 || sizes.uncompressed_size < 0 || sizes.compressed_size < 0 {
        return Err(OrchestrationError::InvalidInput(
            "size deltas must not be negative".into(),
        ));
    }

    let changed = match kind {
        JobKind::Compression => conn.execute(
            "UPDATE compression_jobs SET
               num_tasks_completed = num_tasks_completed + ?1,
               original_size = original_size + ?2,
               uncompressed_size = uncompressed_size + ?3,
               compressed_size = compressed_size + ?4
             WHERE id = ?5
               AND status IN ('SCHEDULING', 'RUNNING')
               AND num_tasks_completed + ?1 <= num_tasks",
            params![
                delta,
                sizes.original_size,
                sizes.uncompressed_size,
                sizes.compressed_size,
                id
            ],
        )?,
        JobKind::Search => {
            if !sizes.is_zero() {
                return Err(OrchestrationError::InvalidInput(
                    "search jobs do not track sizes".into(),
                ));
            }
            conn.execute(
                "UPDATE search_jobs SET num_tasks_completed = num_tasks_completed + ?1
                 WHERE id = ?2
                   AND status IN ('SCHEDULING', 'RUNNING')
                   AND num_tasks_completed + ?1 <= num_tasks",
                params![delta, id],
            )?
        }
    };

    let progress = progress(conn, kind, id)?;
    if changed == 0 {
        if progress.status.is_terminal() {
            return Err(OrchestrationError::invalid_transition(
                "job",
                id,
                progress.status,
                "completed task increment",
            ));
        }
        return Err(OrchestrationError::InvalidInput(format!(
            "job {id} has {} of {} tasks completed, cannot add {delta}",
            progress.num_tasks_completed, progress.num_tasks
        )));
    }

    Ok(progress)
}

/// Reads the counters and status of a job.
pub fn progress(conn: &Connection, kind: JobKind, id: JobId) -> Result<JobProgress> {
    conn.query_row(
        &format!(
            "SELECT status, num_tasks, num_tasks_completed FROM {} WHERE id = ?1",
            kind.jobs_table()
        ),
        params![id],
        |row| {
            Ok(JobProgress {
                status: row.get(0)?,
                num_tasks: row.get(1)?,
                num_tasks_completed: row.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or(OrchestrationError::NotFound { entity: "job", id })
}

/// Records how many tasks a job owns. Only called while its tasks are created.
pub(crate) fn set_num_tasks(conn: &Connection, kind: JobKind, id: JobId, num_tasks: i64) -> Result<()> {
    conn.execute(
        &format!(
            "UPDATE {} SET num_tasks = ?1 WHERE id = ?2 AND num_tasks = 0",
            kind.jobs_table()
        ),
        params![num_tasks, id],
    )?;
    Ok(())
}

/// Lists jobs of one kind, oldest first.
pub fn query(conn: &Connection, kind: JobKind, filter: &JobFilter) -> Result<Vec<JobRecord>> {
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    let where_clause = match filter.status {
        Some(status) => {
            param_values.push(Box::new(status));
            "WHERE status = ?1".to_string()
        }
        None => String::new(),
    };

    let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
    let offset = filter.offset.unwrap_or(0) as i64;
    param_values.push(Box::new(limit));
    param_values.push(Box::new(offset));

    let sql = format!(
        "SELECT {} FROM {} {} ORDER BY creation_time ASC, id ASC LIMIT ?{} OFFSET ?{}",
        select_columns(kind),
        kind.jobs_table(),
        where_clause,
        param_values.len() - 1,
        param_values.len()
    );

    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_ref.as_slice(), |row| from_row(kind, row))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Counts jobs of one kind with the given status.
pub fn count_by_status(conn: &Connection, kind: JobKind, status: JobStatus) -> Result<i64> {
    let count = conn.query_row(
        &format!("SELECT COUNT(*) FROM {} WHERE status = ?1", kind.jobs_table()),
        params![status],
        |r| r.get(0),
    )?;
    Ok(count)
}

/// Deletes a job row. Refused while any task still references the job.
pub fn delete(conn: &Connection, kind: JobKind, id: JobId) -> Result<()> {
    get(conn, kind, id)?;

    let dependents = task_repo::count_for_job(conn, kind, id)?;
    if dependents > 0 {
        return Err(OrchestrationError::ReferentialViolation(format!(
            "{kind} job {id} still has {dependents} task(s)"
        )));
    }

    conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1", kind.jobs_table()),
        params![id],
    )?;
    log::debug!("Deleted {} job {}", kind, id);
    Ok(())
}
