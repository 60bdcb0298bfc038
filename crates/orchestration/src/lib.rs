pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod scheduler;
pub mod worker;

pub use config::{load_config, DatabaseConfig, OrchestrationConfig, SchedulerConfig};
pub use db::Database;
pub use error::{ConfigError, InitError, OrchestrationError, Result};
pub use model::{
    CompletionMetrics, FailurePolicy, JobFilter, JobId, JobKind, JobRecord, JobStatus,
    JobSubmission, SizeTotals, TaskCounts, TaskExecution, TaskId, TaskOutcome, TaskPayload,
    TaskRecord, TaskSpec, TaskStatus, WorkerCapabilities,
};
pub use scheduler::{CompletionReport, Scheduler};
pub use worker::{TaskExecutor, WorkerEvent, WorkerPool};
