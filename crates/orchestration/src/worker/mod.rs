pub mod pool;

use crate::model::{JobId, JobKind, JobStatus, TaskExecution, TaskId, TaskOutcome, TaskRecord};

pub use pool::WorkerPool;

// Re-export crossbeam_channel for pool owners that select over events
pub use crossbeam_channel;

/// Runs the actual work of a task. The pool only orchestrates.
pub trait TaskExecutor: Send + Sync {
    fn execute(&self, task: &TaskRecord) -> TaskExecution;
}

/// Progress notifications streamed to the pool owner.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Claimed {
        worker_id: usize,
        kind: JobKind,
        job_id: JobId,
        task_id: TaskId,
    },
    Completed {
        worker_id: usize,
        kind: JobKind,
        job_id: JobId,
        task_id: TaskId,
        outcome: TaskOutcome,
    },
    JobFinalized {
        kind: JobKind,
        job_id: JobId,
        status: JobStatus,
    },
    Error {
        worker_id: usize,
        message: String,
    },
}
