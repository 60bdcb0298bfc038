//! Scheduler core: the job/task state machine on top of the record stores.
//!
//! The scheduler keeps no state of its own. Every operation is one IMMEDIATE
//! transaction on the shared [`Database`], so any number of `Scheduler`
//! clones, threads or processes can drive the same store.

pub mod aggregator;

use chrono::Utc;
use tracing::{debug, info, info_span, warn};

use crate::config::SchedulerConfig;
use crate::db::{job_repo, task_repo, Database};
use crate::error::{OrchestrationError, Result};
use crate::model::{
    CompletionMetrics, FailurePolicy, JobFilter, JobId, JobKind, JobRecord, JobStatus,
    JobSubmission, TaskCounts, TaskId, TaskOutcome, TaskRecord, TaskSpec, WorkerCapabilities,
};

/// Result of reporting a task completion.
#[derive(Debug, Clone)]
pub struct CompletionReport {
    /// The task after its status change.
    pub task: TaskRecord,
    /// The job, if this completion finalized it.
    pub finalized: Option<JobRecord>,
}

#[derive(Clone)]
pub struct Scheduler {
    db: Database,
    policy: FailurePolicy,
}

impl Scheduler {
    pub fn new(db: Database, policy: FailurePolicy) -> Self {
        Self { db, policy }
    }

    pub fn from_config(db: Database, config: &SchedulerConfig) -> Self {
        Self::new(db, config.failure_policy)
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Creates a job together with all of its tasks.
    pub fn submit(
        &self,
        kind: JobKind,
        submission: &JobSubmission,
        specs: &[TaskSpec],
    ) -> Result<JobId> {
        let _span = info_span!("submit", %kind, tasks = specs.len()).entered();

        let job_id = self.db.with_tx(|tx| {
            let job_id = job_repo::create_job(tx, kind, submission, Utc::now())?;
            task_repo::create_tasks(tx, kind, job_id, specs)?;
            Ok(job_id)
        })?;

        info!(job_id, "Job submitted");
        Ok(job_id)
    }

    /// Creates a job without tasks. Add them with [`Scheduler::create_tasks`].
    pub fn create_job(&self, kind: JobKind, submission: &JobSubmission) -> Result<JobId> {
        self.db
            .with_tx(|tx| job_repo::create_job(tx, kind, submission, Utc::now()))
    }

    pub fn create_tasks(
        &self,
        kind: JobKind,
        job_id: JobId,
        specs: &[TaskSpec],
    ) -> Result<Vec<TaskId>> {
        let _span = info_span!("create_tasks", %kind, job_id).entered();
        let ids = self
            .db
            .with_tx(|tx| task_repo::create_tasks(tx, kind, job_id, specs))?;
        debug!(count = ids.len(), "Tasks created");
        Ok(ids)
    }

    /// Claims the next pending task the worker can execute and moves its job
    /// to RUNNING on the first claim.
    pub fn claim_next(&self, capabilities: &WorkerCapabilities) -> Result<Option<TaskRecord>> {
        let policy = self.policy;
        let claimed = self.db.with_tx(|tx| {
            let now = Utc::now();
            let Some(task) = task_repo::claim_next_pending(tx, capabilities, policy, now)? else {
                return Ok(None);
            };
            if job_repo::mark_started(tx, task.kind(), task.job_id, now)? {
                info!(kind = %task.kind(), job_id = task.job_id, "Job started");
            }
            Ok(Some(task))
        })?;

        if let Some(task) = &claimed {
            debug!(
                kind = %task.kind(),
                job_id = task.job_id,
                task_id = task.id,
                "Task claimed"
            );
        }
        Ok(claimed)
    }

    /// Marks a claimed task as executing.
    pub fn start_task(&self, kind: JobKind, task_id: TaskId) -> Result<TaskRecord> {
        self.db
            .with_tx(|tx| task_repo::record_start(tx, kind, task_id, Utc::now()))
    }

    /// Records a worker's report and applies it to the owning job.
    ///
    /// The task update, the job's counters and a possible finalize commit
    /// together. A report for a task that is no longer RUNNING (for example
    /// after its job was killed) fails with `InvalidTransition`.
    pub fn complete_task(
        &self,
        kind: JobKind,
        task_id: TaskId,
        outcome: TaskOutcome,
        metrics: &CompletionMetrics,
    ) -> Result<CompletionReport> {
        let _span = info_span!("complete_task", %kind, task_id, ?outcome).entered();
        let policy = self.policy;

        let report = self.db.with_tx(|tx| {
            let now = Utc::now();
            let task = task_repo::report_completion(tx, kind, task_id, outcome, metrics, now)?;
            let finalized = aggregator::apply_completion(tx, kind, &task, policy, now)?;
            Ok(CompletionReport { task, finalized })
        });

        match &report {
            Ok(CompletionReport {
                finalized: Some(job),
                ..
            }) => info!(
                job_id = job.id,
                status = %job.status,
                duration = ?job.duration,
                "Job finalized"
            ),
            Ok(_) => debug!("Task completion recorded"),
            Err(e) => warn!(error = %e, "Task completion rejected"),
        }
        report
    }

    /// Kills a job: fails its unfinished tasks and finalizes it as KILLED.
    pub fn kill_job(&self, kind: JobKind, job_id: JobId, status_msg: &str) -> Result<JobRecord> {
        let _span = info_span!("kill_job", %kind, job_id).entered();

        let job = self.db.with_tx(|tx| {
            let job = job_repo::get(tx, kind, job_id)?;
            if job.is_terminal() {
                return Err(OrchestrationError::invalid_transition(
                    "job",
                    job_id,
                    job.status,
                    JobStatus::Killed,
                ));
            }
            let failed = task_repo::fail_unfinished(tx, kind, job_id, true)?;
            debug!(failed, "Unfinished tasks failed");
            job_repo::finalize(tx, kind, job_id, JobStatus::Killed, status_msg, Utc::now())
        })?;

        info!("Job killed");
        Ok(job)
    }

    /// Removes a terminal job and its tasks, tasks first. Returns how many
    /// tasks were deleted.
    pub fn purge_job(&self, kind: JobKind, job_id: JobId) -> Result<usize> {
        let _span = info_span!("purge_job", %kind, job_id).entered();

        let deleted = self.db.with_tx(|tx| {
            let job = job_repo::get(tx, kind, job_id)?;
            if !job.is_terminal() {
                return Err(OrchestrationError::invalid_transition(
                    "job", job_id, job.status, "PURGED",
                ));
            }
            let deleted = task_repo::delete_for_job(tx, kind, job_id)?;
            job_repo::delete(tx, kind, job_id)?;
            Ok(deleted)
        })?;

        info!(tasks = deleted, "Job purged");
        Ok(deleted)
    }

    pub fn job(&self, kind: JobKind, job_id: JobId) -> Result<JobRecord> {
        self.db.read(|conn| job_repo::get(conn, kind, job_id))
    }

    pub fn jobs(&self, kind: JobKind, filter: &JobFilter) -> Result<Vec<JobRecord>> {
        self.db.read(|conn| job_repo::query(conn, kind, filter))
    }

    pub fn tasks(&self, kind: JobKind, job_id: JobId) -> Result<Vec<TaskRecord>> {
        self.db
            .read(|conn| task_repo::list_for_job(conn, kind, job_id))
    }

    pub fn task_counts(&self, kind: JobKind, job_id: JobId) -> Result<TaskCounts> {
        self.db
            .read(|conn| task_repo::status_counts(conn, kind, job_id))
    }

    /// RUNNING tasks of one kind, longest running first.
    pub fn in_flight(&self, kind: JobKind) -> Result<Vec<TaskRecord>> {
        self.db.read(|conn| task_repo::list_in_flight(conn, kind))
    }
}
