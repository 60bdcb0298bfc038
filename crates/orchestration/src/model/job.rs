//! Job records and submissions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::JobStatus;

/// Upper bound for opaque config and path blobs.
pub const MAX_BLOB_LEN: usize = 60_000;
/// Upper bound for `status_msg`; longer messages are truncated.
pub const MAX_STATUS_MSG_LEN: usize = 255;

pub type JobId = i64;

/// The two kinds of work the scheduler orchestrates. Each kind has its own
/// job and task tables, and therefore its own id spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Compression,
    Search,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::Compression, JobKind::Search];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Compression => "compression",
            JobKind::Search => "search",
        }
    }

    pub fn jobs_table(&self) -> &'static str {
        match self {
            JobKind::Compression => "compression_jobs",
            JobKind::Search => "search_jobs",
        }
    }

    pub fn tasks_table(&self) -> &'static str {
        match self {
            JobKind::Compression => "compression_tasks",
            JobKind::Search => "search_tasks",
        }
    }

    /// Only compression jobs roll up size metrics.
    pub fn tracks_sizes(&self) -> bool {
        matches!(self, JobKind::Compression)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated size totals of a compression job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeTotals {
    pub original_size: i64,
    pub uncompressed_size: i64,
    pub compressed_size: i64,
}

impl SizeTotals {
    pub fn is_zero(&self) -> bool {
        *self == SizeTotals::default()
    }
}

/// What a caller hands in to create a job.
#[derive(Debug, Clone, Default)]
pub struct JobSubmission {
    /// Opaque serialized job configuration.
    pub config: Vec<u8>,
    /// Version of the worker binary the job targets, if pinned.
    pub binary_version: Option<i64>,
}

impl JobSubmission {
    pub fn new(config: impl Into<Vec<u8>>) -> Self {
        Self {
            config: config.into(),
            binary_version: None,
        }
    }

    pub fn with_binary_version(mut self, version: i64) -> Self {
        self.binary_version = Some(version);
        self
    }
}

/// A job row as persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub status_msg: String,
    pub creation_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    /// Seconds from start to terminal state.
    pub duration: Option<f64>,
    pub num_tasks: i64,
    pub num_tasks_completed: i64,
    /// `None` for search jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sizes: Option<SizeTotals>,
    #[serde(skip)]
    pub config: Vec<u8>,
    pub binary_version: Option<i64>,
}

impl JobRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Counter state returned after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobProgress {
    pub status: JobStatus,
    pub num_tasks: i64,
    pub num_tasks_completed: i64,
}

impl JobProgress {
    pub fn all_completed(&self) -> bool {
        self.num_tasks > 0 && self.num_tasks_completed == self.num_tasks
    }
}

/// What the scheduler does with a job's remaining tasks once one of them
/// has failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop dispatching the job's pending tasks, let in-flight ones drain,
    /// then finalize the job as FAILED.
    #[default]
    FailFast,
    /// Run every task and finalize once all of them have completed.
    BestEffort,
}

impl FailurePolicy {
    pub fn stops_on_failure(&self) -> bool {
        matches!(self, FailurePolicy::FailFast)
    }
}

/// Filter for listing jobs of one kind.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Wall-clock seconds between two instants, never negative.
pub(crate) fn elapsed_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds().max(0) as f64 / 1000.0
}

/// Truncates a status message to the column bound on a char boundary.
pub(crate) fn bounded_status_msg(msg: &str) -> String {
    msg.trim().chars().take(MAX_STATUS_MSG_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tables() {
        assert_eq!(JobKind::Compression.jobs_table(), "compression_jobs");
        assert_eq!(JobKind::Compression.tasks_table(), "compression_tasks");
        assert_eq!(JobKind::Search.jobs_table(), "search_jobs");
        assert_eq!(JobKind::Search.tasks_table(), "search_tasks");
        assert!(JobKind::Compression.tracks_sizes());
        assert!(!JobKind::Search.tracks_sizes());
    }

    #[test]
    fn test_progress_completion() {
        let progress = JobProgress {
            status: JobStatus::Running,
            num_tasks: 3,
            num_tasks_completed: 3,
        };
        assert!(progress.all_completed());

        let empty = JobProgress {
            status: JobStatus::Scheduling,
            num_tasks: 0,
            num_tasks_completed: 0,
        };
        assert!(!empty.all_completed());
    }

    #[test]
    fn test_elapsed_seconds_is_clamped() {
        let start = Utc::now();
        let later = start + chrono::Duration::milliseconds(1_500);
        assert_eq!(elapsed_seconds(start, later), 1.5);
        assert_eq!(elapsed_seconds(later, start), 0.0);
    }

    #[test]
    fn test_failure_policy_default_and_serde() {
        assert_eq!(FailurePolicy::default(), FailurePolicy::FailFast);
        let policy: FailurePolicy = serde_yaml::from_str("best-effort").unwrap();
        assert_eq!(policy, FailurePolicy::BestEffort);
        assert!(!policy.stops_on_failure());
    }

    #[test]
    fn test_status_msg_is_bounded() {
        let long = "é".repeat(400);
        let bounded = bounded_status_msg(&long);
        assert_eq!(bounded.chars().count(), MAX_STATUS_MSG_LEN);
        assert_eq!(bounded_status_msg("  ok  "), "ok");
    }
}
