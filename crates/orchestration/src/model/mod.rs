pub mod job;
pub mod status;
pub mod task;

pub(crate) use job::{bounded_status_msg, elapsed_seconds};
pub use job::{
    FailurePolicy, JobFilter, JobId, JobKind, JobProgress, JobRecord, JobSubmission, SizeTotals,
    MAX_BLOB_LEN, MAX_STATUS_MSG_LEN,
};
pub use status::{JobStatus, TaskOutcome, TaskStatus};
pub use task::{
    CompletionMetrics, PartitionSizes, TaskCounts, TaskExecution, TaskId, TaskPayload, TaskRecord,
    TaskSpec, WorkerCapabilities, MAX_ARCHIVE_ID_LEN,
};
