//! Task records, creation specs and completion metrics.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::job::{JobId, JobKind, SizeTotals, MAX_BLOB_LEN};
use super::status::{TaskOutcome, TaskStatus};
use crate::error::OrchestrationError;

/// Upper bound for a search task's archive id.
pub const MAX_ARCHIVE_ID_LEN: usize = 64;

pub type TaskId = i64;

/// Description of one task to create alongside its job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSpec {
    Compression {
        /// Serialized batch of file paths, opaque to the scheduler.
        paths_to_compress: Vec<u8>,
        partition_original_size: i64,
    },
    Search {
        archive_id: String,
    },
}

impl TaskSpec {
    pub fn compression(paths_to_compress: impl Into<Vec<u8>>, original_size: i64) -> Self {
        TaskSpec::Compression {
            paths_to_compress: paths_to_compress.into(),
            partition_original_size: original_size,
        }
    }

    pub fn search(archive_id: impl Into<String>) -> Self {
        TaskSpec::Search {
            archive_id: archive_id.into(),
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            TaskSpec::Compression { .. } => JobKind::Compression,
            TaskSpec::Search { .. } => JobKind::Search,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), OrchestrationError> {
        match self {
            TaskSpec::Compression {
                paths_to_compress,
                partition_original_size,
            } => {
                if paths_to_compress.len() > MAX_BLOB_LEN {
                    return Err(OrchestrationError::ConfigTooLarge {
                        field: "paths_to_compress",
                        size: paths_to_compress.len(),
                        limit: MAX_BLOB_LEN,
                    });
                }
                if *partition_original_size < 0 {
                    return Err(OrchestrationError::InvalidInput(
                        "partition_original_size must not be negative".into(),
                    ));
                }
            }
            TaskSpec::Search { archive_id } => {
                let archive_id = archive_id.trim();
                if archive_id.is_empty() {
                    return Err(OrchestrationError::InvalidInput(
                        "archive_id must not be empty".into(),
                    ));
                }
                if archive_id.chars().count() > MAX_ARCHIVE_ID_LEN {
                    return Err(OrchestrationError::InvalidInput(format!(
                        "archive_id exceeds {MAX_ARCHIVE_ID_LEN} characters"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Kind-specific part of a task row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TaskPayload {
    #[serde(rename_all = "camelCase")]
    Compression {
        #[serde(skip)]
        paths_to_compress: Vec<u8>,
        partition_original_size: i64,
        partition_uncompressed_size: Option<i64>,
        partition_compressed_size: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    Search { archive_id: String },
}

/// A task row as persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: TaskId,
    pub job_id: JobId,
    pub status: TaskStatus,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    /// Execution time in seconds.
    pub duration: Option<f64>,
    pub payload: TaskPayload,
}

impl TaskRecord {
    pub fn kind(&self) -> JobKind {
        match self.payload {
            TaskPayload::Compression { .. } => JobKind::Compression,
            TaskPayload::Search { .. } => JobKind::Search,
        }
    }

    /// Sizes this task contributes to its job once it has succeeded.
    pub fn size_contribution(&self) -> SizeTotals {
        match (&self.payload, self.status) {
            (
                TaskPayload::Compression {
                    partition_original_size,
                    partition_uncompressed_size,
                    partition_compressed_size,
                    ..
                },
                TaskStatus::Success,
            ) => SizeTotals {
                original_size: *partition_original_size,
                uncompressed_size: partition_uncompressed_size.unwrap_or(0),
                compressed_size: partition_compressed_size.unwrap_or(0),
            },
            _ => SizeTotals::default(),
        }
    }
}

/// Sizes a compression worker reports for its partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionSizes {
    pub uncompressed_size: i64,
    pub compressed_size: i64,
}

/// What a worker reports alongside a completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionMetrics {
    /// Measured execution time in seconds. When absent the store measures it
    /// from the task's start (or scheduled) time.
    pub duration: Option<f64>,
    pub sizes: Option<PartitionSizes>,
}

impl CompletionMetrics {
    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    pub fn with_sizes(mut self, uncompressed_size: i64, compressed_size: i64) -> Self {
        self.sizes = Some(PartitionSizes {
            uncompressed_size,
            compressed_size,
        });
        self
    }

    pub(crate) fn validate(&self) -> Result<(), OrchestrationError> {
        if let Some(duration) = self.duration {
            if !duration.is_finite() || duration < 0.0 {
                return Err(OrchestrationError::InvalidInput(
                    "duration must be a non-negative number of seconds".into(),
                ));
            }
        }
        if let Some(sizes) = self.sizes {
            if sizes.uncompressed_size < 0 || sizes.compressed_size < 0 {
                return Err(OrchestrationError::InvalidInput(
                    "reported sizes must not be negative".into(),
                ));
            }
        }
        Ok(())
    }
}

/// A worker's full report for a task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskExecution {
    pub outcome: TaskOutcome,
    pub metrics: CompletionMetrics,
}

impl TaskExecution {
    pub fn success(metrics: CompletionMetrics) -> Self {
        Self {
            outcome: TaskOutcome::Success,
            metrics,
        }
    }

    pub fn failed(metrics: CompletionMetrics) -> Self {
        Self {
            outcome: TaskOutcome::Failed,
            metrics,
        }
    }
}

/// Per-status task counts of one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub submitted: i64,
    pub running: i64,
    pub succeeded: i64,
    pub failed: i64,
}

impl TaskCounts {
    pub fn total(&self) -> i64 {
        self.submitted + self.running + self.succeeded + self.failed
    }

    pub fn in_flight(&self) -> i64 {
        self.running
    }
}

/// The job kinds a worker is able to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCapabilities {
    pub kinds: Vec<JobKind>,
}

impl WorkerCapabilities {
    pub fn all() -> Self {
        Self {
            kinds: JobKind::ALL.to_vec(),
        }
    }

    pub fn only(kind: JobKind) -> Self {
        Self { kinds: vec![kind] }
    }

    pub fn supports(&self, kind: JobKind) -> bool {
        self.kinds.contains(&kind)
    }
}

impl Default for WorkerCapabilities {
    fn default() -> Self {
        Self::all()
    }
}
