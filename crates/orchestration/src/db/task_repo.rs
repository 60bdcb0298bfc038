//! Task record store for both job kinds.
//!
//! Claims and completions are compare-and-set updates on the task's status,
//! so a second claimant or a stale report sees zero changed rows and gets
//! `InvalidTransition` instead of overwriting someone else's work.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::job_repo;
use crate::error::{OrchestrationError, Result};
use crate::model::{
    elapsed_seconds, CompletionMetrics, FailurePolicy, JobId, JobKind, JobStatus, TaskCounts,
    TaskId, TaskOutcome, TaskPayload, TaskRecord, TaskSpec, TaskStatus, WorkerCapabilities,
};

fn select_columns(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Compression => {
            "id, job_id, status, scheduled_time, start_time, duration, paths_to_compress, \
             partition_original_size, partition_uncompressed_size, partition_compressed_size"
        }
        JobKind::Search => "id, job_id, status, scheduled_time, start_time, duration, archive_id",
    }
}

fn from_row(kind: JobKind, row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    let payload = match kind {
        JobKind::Compression => TaskPayload::Compression {
            paths_to_compress: row.get("paths_to_compress")?,
            partition_original_size: row.get("partition_original_size")?,
            partition_uncompressed_size: row.get("partition_uncompressed_size")?,
            partition_compressed_size: row.get("partition_compressed_size")?,
        },
        JobKind::Search => TaskPayload::Search {
            archive_id: row.get("archive_id")?,
        },
    };

    Ok(TaskRecord {
        id: row.get("id")?,
        job_id: row.get("job_id")?,
        status: row.get("status")?,
        scheduled_time: row.get("scheduled_time")?,
        start_time: row.get("start_time")?,
        duration: row.get("duration")?,
        payload,
    })
}

/// Creates every task of a job, or none of them.
///
/// The job must exist, still be SCHEDULING and have no tasks yet. The job's
/// `num_tasks` is set to the number of created tasks.
pub fn create_tasks(
    conn: &Connection,
    kind: JobKind,
    job_id: JobId,
    specs: &[TaskSpec],
) -> Result<Vec<TaskId>> {
    if specs.is_empty() {
        return Err(OrchestrationError::InvalidInput(
            "a job needs at least one task".into(),
        ));
    }
    for spec in specs {
        if spec.kind() != kind {
            return Err(OrchestrationError::InvalidInput(format!(
                "{} task cannot belong to a {kind} job",
                spec.kind()
            )));
        }
        spec.validate()?;
    }

    let job = job_repo::find_by_id(conn, kind, job_id)?.ok_or_else(|| {
        OrchestrationError::ReferentialViolation(format!("{kind} job {job_id} does not exist"))
    })?;
    if job.status != JobStatus::Scheduling {
        return Err(OrchestrationError::ReferentialViolation(format!(
            "{kind} job {job_id} is {}, tasks can only be added while SCHEDULING",
            job.status
        )));
    }
    if job.num_tasks > 0 || count_for_job(conn, kind, job_id)? > 0 {
        return Err(OrchestrationError::ReferentialViolation(format!(
            "{kind} job {job_id} already has its tasks"
        )));
    }

    let mut ids = Vec::with_capacity(specs.len());
    for spec in specs {
        match spec {
            TaskSpec::Compression {
                paths_to_compress,
                partition_original_size,
            } => {
                conn.execute(
                    "INSERT INTO compression_tasks (status, job_id, paths_to_compress, partition_original_size)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        TaskStatus::Submitted,
                        job_id,
                        paths_to_compress,
                        partition_original_size
                    ],
                )?;
            }
            TaskSpec::Search { archive_id } => {
                conn.execute(
                    "INSERT INTO search_tasks (status, job_id, archive_id) VALUES (?1, ?2, ?3)",
                    params![TaskStatus::Submitted, job_id, archive_id.trim()],
                )?;
            }
        }
        ids.push(conn.last_insert_rowid());
    }

    job_repo::set_num_tasks(conn, kind, job_id, ids.len() as i64)?;

    log::debug!("Created {} task(s) for {} job {}", ids.len(), kind, job_id);
    Ok(ids)
}

/// Finds a task by its ID.
pub fn find_by_id(conn: &Connection, kind: JobKind, id: TaskId) -> Result<Option<TaskRecord>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM {} WHERE id = ?1",
                select_columns(kind),
                kind.tasks_table()
            ),
            params![id],
            |row| from_row(kind, row),
        )
        .optional()?;
    Ok(row)
}

/// Like [`find_by_id`], but a missing task is an error.
pub fn get(conn: &Connection, kind: JobKind, id: TaskId) -> Result<TaskRecord> {
    find_by_id(conn, kind, id)?.ok_or(OrchestrationError::NotFound { entity: "task", id })
}

/// Oldest eligible task of one kind as `(job creation time, job id, task id)`.
fn next_candidate(
    conn: &Connection,
    kind: JobKind,
    policy: FailurePolicy,
) -> Result<Option<(DateTime<Utc>, JobId, TaskId)>> {
    let skip_failed_jobs = if policy.stops_on_failure() {
        format!(
            "AND NOT EXISTS (SELECT 1 FROM {tasks} f WHERE f.job_id = t.job_id AND f.status = 'FAILED')",
            tasks = kind.tasks_table()
        )
    } else {
        String::new()
    };

    let sql = format!(
        "SELECT j.creation_time, j.id, t.id
         FROM {tasks} t JOIN {jobs} j ON j.id = t.job_id
         WHERE t.status = 'SUBMITTED'
           AND j.status IN ('SCHEDULING', 'RUNNING')
           {skip_failed_jobs}
         ORDER BY j.creation_time ASC, j.id ASC, t.id ASC
         LIMIT 1",
        tasks = kind.tasks_table(),
        jobs = kind.jobs_table(),
    );

    let candidate = conn
        .query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .optional()?;
    Ok(candidate)
}

/// Claims the next pending task of any kind the worker supports.
///
/// Returns `None` when no task is eligible.
pub fn claim_next_pending(
    conn: &Connection,
    capabilities: &WorkerCapabilities,
    policy: FailurePolicy,
    now: DateTime<Utc>,
) -> Result<Option<TaskRecord>> {
    let mut best: Option<(JobKind, (DateTime<Utc>, JobId, TaskId))> = None;
    for kind in JobKind::ALL.into_iter().filter(|&k| capabilities.supports(k)) {
        let Some(candidate) = next_candidate(conn, kind, policy)? else {
            continue;
        };
        let older = match &best {
            Some((_, current)) => (candidate.0, candidate.1) < (current.0, current.1),
            None => true,
        };
        if older {
            best = Some((kind, candidate));
        }
    }

    match best {
        Some((kind, (_, _, task_id))) => claim(conn, kind, task_id, now).map(Some),
        None => Ok(None),
    }
}

/// Claims a specific task: SUBMITTED → RUNNING, stamping `scheduled_time`.
pub fn claim(conn: &Connection, kind: JobKind, id: TaskId, now: DateTime<Utc>) -> Result<TaskRecord> {
    let changed = conn.execute(
        &format!(
            "UPDATE {} SET status = ?1, scheduled_time = ?2 WHERE id = ?3 AND status = ?4",
            kind.tasks_table()
        ),
        params![TaskStatus::Running, now, id, TaskStatus::Submitted],
    )?;
    let task = get(conn, kind, id)?;
    if changed == 0 {
        return Err(OrchestrationError::invalid_transition(
            "task",
            id,
            task.status,
            TaskStatus::Running,
        ));
    }

    log::debug!("Claimed {} task {} of job {}", kind, id, task.job_id);
    Ok(task)
}

/// Stamps `start_time` on a RUNNING task. A second call keeps the first stamp.
pub fn record_start(
    conn: &Connection,
    kind: JobKind,
    id: TaskId,
    now: DateTime<Utc>,
) -> Result<TaskRecord> {
    let changed = conn.execute(
        &format!(
            "UPDATE {} SET start_time = COALESCE(start_time, ?1) WHERE id = ?2 AND status = ?3",
            kind.tasks_table()
        ),
        params![now, id, TaskStatus::Running],
    )?;
    let task = get(conn, kind, id)?;
    if changed == 0 {
        return Err(OrchestrationError::invalid_transition(
            "task",
            id,
            task.status,
            "started",
        ));
    }
    Ok(task)
}

/// Records a worker's report: RUNNING → SUCCESS/FAILED with duration and,
/// for compression tasks, the partition sizes.
pub fn report_completion(
    conn: &Connection,
    kind: JobKind,
    id: TaskId,
    outcome: TaskOutcome,
    metrics: &CompletionMetrics,
    now: DateTime<Utc>,
) -> Result<TaskRecord> {
    metrics.validate()?;
    if metrics.sizes.is_some() && !kind.tracks_sizes() {
        return Err(OrchestrationError::InvalidInput(
            "search tasks do not report sizes".into(),
        ));
    }

    let target = TaskStatus::from(outcome);
    let task = get(conn, kind, id)?;
    if !task.status.can_transition_to(target) || task.status != TaskStatus::Running {
        return Err(OrchestrationError::invalid_transition(
            "task", id, task.status, target,
        ));
    }

    let duration = metrics.duration.unwrap_or_else(|| {
        let began = task.start_time.or(task.scheduled_time).unwrap_or(now);
        elapsed_seconds(began, now)
    });

    let changed = match kind {
        JobKind::Compression => {
            let (uncompressed, compressed) = match metrics.sizes {
                Some(sizes) => (Some(sizes.uncompressed_size), Some(sizes.compressed_size)),
                None => (None, None),
            };
            conn.execute(
                "UPDATE compression_tasks SET
                   status = ?1,
                   duration = ?2,
                   partition_uncompressed_size = COALESCE(?3, partition_uncompressed_size),
                   partition_compressed_size = COALESCE(?4, partition_compressed_size)
                 WHERE id = ?5 AND status = ?6",
                params![target, duration, uncompressed, compressed, id, TaskStatus::Running],
            )?
        }
        JobKind::Search => conn.execute(
            "UPDATE search_tasks SET status = ?1, duration = ?2 WHERE id = ?3 AND status = ?4",
            params![target, duration, id, TaskStatus::Running],
        )?,
    };
    if changed == 0 {
        let current = get(conn, kind, id)?;
        return Err(OrchestrationError::invalid_transition(
            "task",
            id,
            current.status,
            target,
        ));
    }

    log::debug!("{} task {} finished as {} in {:.3}s", kind, id, target, duration);
    get(conn, kind, id)
}

/// Forces the unfinished tasks of a job to FAILED and returns how many
/// changed. RUNNING tasks are included only when `include_running` is set.
pub fn fail_unfinished(
    conn: &Connection,
    kind: JobKind,
    job_id: JobId,
    include_running: bool,
) -> Result<usize> {
    let statuses = if include_running {
        "('SUBMITTED', 'RUNNING')"
    } else {
        "('SUBMITTED')"
    };
    let changed = conn.execute(
        &format!(
            "UPDATE {} SET status = ?1 WHERE job_id = ?2 AND status IN {statuses}",
            kind.tasks_table()
        ),
        params![TaskStatus::Failed, job_id],
    )?;
    if changed > 0 {
        log::debug!(
            "Forced {} task(s) of {} job {} to FAILED",
            changed,
            kind,
            job_id
        );
    }
    Ok(changed)
}

/// Per-status task counts of one job.
pub fn status_counts(conn: &Connection, kind: JobKind, job_id: JobId) -> Result<TaskCounts> {
    let mut stmt = conn.prepare(&format!(
        "SELECT status, COUNT(*) FROM {} WHERE job_id = ?1 GROUP BY status",
        kind.tasks_table()
    ))?;
    let rows = stmt
        .query_map(params![job_id], |row| {
            Ok((row.get::<_, TaskStatus>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut counts = TaskCounts::default();
    for (status, count) in rows {
        match status {
            TaskStatus::Submitted => counts.submitted = count,
            TaskStatus::Running => counts.running = count,
            TaskStatus::Success => counts.succeeded = count,
            TaskStatus::Failed => counts.failed = count,
        }
    }
    Ok(counts)
}

/// Number of task rows referencing a job.
pub fn count_for_job(conn: &Connection, kind: JobKind, job_id: JobId) -> Result<i64> {
    let count = conn.query_row(
        &format!("SELECT COUNT(*) FROM {} WHERE job_id = ?1", kind.tasks_table()),
        params![job_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

/// All tasks of a job in id order.
pub fn list_for_job(conn: &Connection, kind: JobKind, job_id: JobId) -> Result<Vec<TaskRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} WHERE job_id = ?1 ORDER BY id ASC",
        select_columns(kind),
        kind.tasks_table()
    ))?;
    let rows = stmt
        .query_map(params![job_id], |row| from_row(kind, row))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// RUNNING tasks of one kind, longest running first. Tasks that were claimed
/// but never started sort by their scheduled time.
pub fn list_in_flight(conn: &Connection, kind: JobKind) -> Result<Vec<TaskRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} WHERE status = ?1
         ORDER BY COALESCE(start_time, scheduled_time) ASC, id ASC",
        select_columns(kind),
        kind.tasks_table()
    ))?;
    let rows = stmt
        .query_map(params![TaskStatus::Running], |row| from_row(kind, row))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Deletes every task of a job. Only used when purging a terminal job.
pub(crate) fn delete_for_job(conn: &Connection, kind: JobKind, job_id: JobId) -> Result<usize> {
    let deleted = conn.execute(
        &format!("DELETE FROM {} WHERE job_id = ?1", kind.tasks_table()),
        params![job_id],
    )?;
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::model::JobSubmission;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn job_with_tasks(db: &Database, kind: JobKind, specs: Vec<TaskSpec>) -> (JobId, Vec<TaskId>) {
        db.with_tx(|tx| {
            let job_id = job_repo::create_job(tx, kind, &JobSubmission::new(b"c".to_vec()), Utc::now())?;
            let ids = create_tasks(tx, kind, job_id, &specs)?;
            Ok((job_id, ids))
        })
        .unwrap()
    }

    fn search_specs(n: usize) -> Vec<TaskSpec> {
        (0..n).map(|i| TaskSpec::search(format!("archive-{i}"))).collect()
    }

    #[test]
    fn test_create_tasks_sets_num_tasks() {
        let db = test_db();
        let (job_id, ids) = job_with_tasks(
            &db,
            JobKind::Compression,
            vec![
                TaskSpec::compression(b"/a".to_vec(), 10),
                TaskSpec::compression(b"/b".to_vec(), 20),
            ],
        );
        assert_eq!(ids.len(), 2);
        assert!(ids[1] > ids[0]);

        let job = db
            .read(|conn| job_repo::get(conn, JobKind::Compression, job_id))
            .unwrap();
        assert_eq!(job.num_tasks, 2);

        let tasks = db
            .read(|conn| list_for_job(conn, JobKind::Compression, job_id))
            .unwrap();
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Submitted));
        assert_eq!(
            tasks[1].payload,
            TaskPayload::Compression {
                paths_to_compress: b"/b".to_vec(),
                partition_original_size: 20,
                partition_uncompressed_size: None,
                partition_compressed_size: None,
            }
        );
    }

    #[test]
    fn test_create_tasks_only_once() {
        let db = test_db();
        let (job_id, _) = job_with_tasks(&db, JobKind::Search, search_specs(1));
        let result = db.with_tx(|tx| create_tasks(tx, JobKind::Search, job_id, &search_specs(1)));
        assert!(matches!(
            result,
            Err(OrchestrationError::ReferentialViolation(_))
        ));
    }

    #[test]
    fn test_create_tasks_for_missing_job() {
        let db = test_db();
        let result = db.with_tx(|tx| create_tasks(tx, JobKind::Search, 99, &search_specs(1)));
        assert!(matches!(
            result,
            Err(OrchestrationError::ReferentialViolation(_))
        ));
    }

    #[test]
    fn test_create_tasks_rejects_bad_input() {
        let db = test_db();
        let job_id = db
            .with_tx(|tx| job_repo::create_job(tx, JobKind::Search, &JobSubmission::default(), Utc::now()))
            .unwrap();

        let empty = db.with_tx(|tx| create_tasks(tx, JobKind::Search, job_id, &[]));
        assert!(matches!(empty, Err(OrchestrationError::InvalidInput(_))));

        let mismatched = db.with_tx(|tx| {
            create_tasks(
                tx,
                JobKind::Search,
                job_id,
                &[TaskSpec::compression(b"x".to_vec(), 1)],
            )
        });
        assert!(matches!(mismatched, Err(OrchestrationError::InvalidInput(_))));

        // One bad spec means nothing is written.
        let partial = db.with_tx(|tx| {
            create_tasks(
                tx,
                JobKind::Search,
                job_id,
                &[TaskSpec::search("ok"), TaskSpec::search("")],
            )
        });
        assert!(partial.is_err());
        let count = db
            .read(|conn| count_for_job(conn, JobKind::Search, job_id))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_claim_order_is_oldest_job_then_task_id() {
        let db = test_db();
        let (first_job, first_ids) = job_with_tasks(&db, JobKind::Search, search_specs(2));
        let (_, second_ids) = job_with_tasks(&db, JobKind::Search, search_specs(1));

        let caps = WorkerCapabilities::all();
        let mut claimed = Vec::new();
        while let Some(task) = db
            .with_tx(|tx| claim_next_pending(tx, &caps, FailurePolicy::FailFast, Utc::now()))
            .unwrap()
        {
            assert_eq!(task.status, TaskStatus::Running);
            assert!(task.scheduled_time.is_some());
            claimed.push(task.id);
        }

        assert_eq!(claimed, vec![first_ids[0], first_ids[1], second_ids[0]]);
        let counts = db
            .read(|conn| status_counts(conn, JobKind::Search, first_job))
            .unwrap();
        assert_eq!(counts.running, 2);
    }

    #[test]
    fn test_claim_respects_capabilities() {
        let db = test_db();
        job_with_tasks(&db, JobKind::Search, search_specs(1));

        let none = db
            .with_tx(|tx| {
                claim_next_pending(
                    tx,
                    &WorkerCapabilities::only(JobKind::Compression),
                    FailurePolicy::FailFast,
                    Utc::now(),
                )
            })
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_claim_ignores_repeated_and_missing_kinds() {
        let db = test_db();
        let (_, ids) = job_with_tasks(&db, JobKind::Search, search_specs(1));

        let nothing = WorkerCapabilities { kinds: Vec::new() };
        let claimed = db
            .with_tx(|tx| claim_next_pending(tx, &nothing, FailurePolicy::FailFast, Utc::now()))
            .unwrap();
        assert!(claimed.is_none());

        let repeated = WorkerCapabilities {
            kinds: vec![JobKind::Search, JobKind::Search],
        };
        let claimed = db
            .with_tx(|tx| claim_next_pending(tx, &repeated, FailurePolicy::FailFast, Utc::now()))
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, ids[0]);
        let again = db
            .with_tx(|tx| claim_next_pending(tx, &repeated, FailurePolicy::FailFast, Utc::now()))
            .unwrap();
        assert!(again.is_none());
    }

    #[test]
    fn test_claim_skips_terminal_jobs() {
        let db = test_db();
        let (job_id, _) = job_with_tasks(&db, JobKind::Search, search_specs(1));
        db.with_tx(|tx| {
            job_repo::finalize(tx, JobKind::Search, job_id, JobStatus::Killed, "", Utc::now())
        })
        .unwrap();

        let claimed = db
            .with_tx(|tx| {
                claim_next_pending(tx, &WorkerCapabilities::all(), FailurePolicy::BestEffort, Utc::now())
            })
            .unwrap();
        assert!(claimed.is_none());
    }

    #[test]
    fn test_fail_fast_skips_jobs_with_failed_task() {
        let db = test_db();
        let (_, ids) = job_with_tasks(&db, JobKind::Search, search_specs(2));
        db.with_tx(|tx| {
            claim(tx, JobKind::Search, ids[0], Utc::now())?;
            report_completion(
                tx,
                JobKind::Search,
                ids[0],
                TaskOutcome::Failed,
                &CompletionMetrics::default(),
                Utc::now(),
            )
        })
        .unwrap();

        let caps = WorkerCapabilities::all();
        let fail_fast = db
            .with_tx(|tx| claim_next_pending(tx, &caps, FailurePolicy::FailFast, Utc::now()))
            .unwrap();
        assert!(fail_fast.is_none());

        let best_effort = db
            .with_tx(|tx| claim_next_pending(tx, &caps, FailurePolicy::BestEffort, Utc::now()))
            .unwrap();
        assert_eq!(best_effort.map(|t| t.id), Some(ids[1]));
    }

    #[test]
    fn test_claim_twice_is_invalid_transition() {
        let db = test_db();
        let (_, ids) = job_with_tasks(&db, JobKind::Search, search_specs(1));
        db.with_tx(|tx| claim(tx, JobKind::Search, ids[0], Utc::now()))
            .unwrap();
        let again = db.with_tx(|tx| claim(tx, JobKind::Search, ids[0], Utc::now()));
        assert!(matches!(
            again,
            Err(OrchestrationError::InvalidTransition { entity: "task", .. })
        ));
    }

    #[test]
    fn test_record_start_is_idempotent() {
        let db = test_db();
        let (_, ids) = job_with_tasks(&db, JobKind::Search, search_specs(1));

        let not_claimed = db.with_tx(|tx| record_start(tx, JobKind::Search, ids[0], Utc::now()));
        assert!(matches!(
            not_claimed,
            Err(OrchestrationError::InvalidTransition { .. })
        ));

        let t0 = Utc::now();
        db.with_tx(|tx| claim(tx, JobKind::Search, ids[0], t0)).unwrap();
        let first = db
            .with_tx(|tx| record_start(tx, JobKind::Search, ids[0], t0))
            .unwrap();
        let second = db
            .with_tx(|tx| {
                record_start(tx, JobKind::Search, ids[0], t0 + chrono::Duration::seconds(5))
            })
            .unwrap();
        assert_eq!(first.start_time, Some(t0));
        assert_eq!(second.start_time, first.start_time);
    }

    #[test]
    fn test_report_completion_records_sizes_and_duration() {
        let db = test_db();
        let (_, ids) = job_with_tasks(
            &db,
            JobKind::Compression,
            vec![TaskSpec::compression(b"/p".to_vec(), 100)],
        );
        let t0 = Utc::now();
        let task = db
            .with_tx(|tx| {
                claim(tx, JobKind::Compression, ids[0], t0)?;
                record_start(tx, JobKind::Compression, ids[0], t0)?;
                report_completion(
                    tx,
                    JobKind::Compression,
                    ids[0],
                    TaskOutcome::Success,
                    &CompletionMetrics::default().with_sizes(50, 40),
                    t0 + chrono::Duration::milliseconds(1_250),
                )
            })
            .unwrap();

        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(task.duration, Some(1.25));
        assert_eq!(
            task.payload,
            TaskPayload::Compression {
                paths_to_compress: b"/p".to_vec(),
                partition_original_size: 100,
                partition_uncompressed_size: Some(50),
                partition_compressed_size: Some(40),
            }
        );
    }

    #[test]
    fn test_report_completion_requires_running() {
        let db = test_db();
        let (_, ids) = job_with_tasks(&db, JobKind::Search, search_specs(1));
        let result = db.with_tx(|tx| {
            report_completion(
                tx,
                JobKind::Search,
                ids[0],
                TaskOutcome::Success,
                &CompletionMetrics::default(),
                Utc::now(),
            )
        });
        assert!(matches!(
            result,
            Err(OrchestrationError::InvalidTransition { .. })
        ));

        let missing = db.with_tx(|tx| {
            report_completion(
                tx,
                JobKind::Search,
                404,
                TaskOutcome::Success,
                &CompletionMetrics::default(),
                Utc::now(),
            )
        });
        assert!(matches!(
            missing,
            Err(OrchestrationError::NotFound { entity: "task", id: 404 })
        ));
    }

    #[test]
    fn test_search_tasks_reject_sizes() {
        let db = test_db();
        let (_, ids) = job_with_tasks(&db, JobKind::Search, search_specs(1));
        let result = db.with_tx(|tx| {
            claim(tx, JobKind::Search, ids[0], Utc::now())?;
            report_completion(
                tx,
                JobKind::Search,
                ids[0],
                TaskOutcome::Success,
                &CompletionMetrics::default().with_sizes(1, 1),
                Utc::now(),
            )
        });
        assert!(matches!(result, Err(OrchestrationError::InvalidInput(_))));
    }

    #[test]
    fn test_fail_unfinished() {
        let db = test_db();
        let (job_id, ids) = job_with_tasks(&db, JobKind::Search, search_specs(3));
        db.with_tx(|tx| claim(tx, JobKind::Search, ids[0], Utc::now()))
            .unwrap();

        let changed = db
            .with_tx(|tx| fail_unfinished(tx, JobKind::Search, job_id, false))
            .unwrap();
        assert_eq!(changed, 2);
        let counts = db
            .read(|conn| status_counts(conn, JobKind::Search, job_id))
            .unwrap();
        assert_eq!(
            counts,
            TaskCounts {
                submitted: 0,
                running: 1,
                succeeded: 0,
                failed: 2,
            }
        );

        let changed = db
            .with_tx(|tx| fail_unfinished(tx, JobKind::Search, job_id, true))
            .unwrap();
        assert_eq!(changed, 1);
    }

    #[test]
    fn test_list_in_flight() {
        let db = test_db();
        let (_, ids) = job_with_tasks(&db, JobKind::Search, search_specs(3));
        let t0 = Utc::now();
        db.with_tx(|tx| {
            claim(tx, JobKind::Search, ids[2], t0)?;
            claim(tx, JobKind::Search, ids[0], t0 + chrono::Duration::seconds(1))
        })
        .unwrap();

        let running = db
            .read(|conn| list_in_flight(conn, JobKind::Search))
            .unwrap();
        assert_eq!(
            running.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![ids[2], ids[0]]
        );
    }
}
