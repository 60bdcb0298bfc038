//! Job and task status vocabularies and their transition rules.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::OrchestrationError;

/// Lifecycle of a job.
///
/// `SCHEDULING -> RUNNING -> {SUCCESS | FAILED | KILLED}`. A job that never
/// started may still fail or be killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Scheduling,
    Running,
    Success,
    Failed,
    Killed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Scheduling,
        JobStatus::Running,
        JobStatus::Success,
        JobStatus::Failed,
        JobStatus::Killed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Scheduling => "SCHEDULING",
            JobStatus::Running => "RUNNING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failed => "FAILED",
            JobStatus::Killed => "KILLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Killed
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Scheduling, Running)
                | (Scheduling, Failed)
                | (Scheduling, Killed)
                | (Running, Success)
                | (Running, Failed)
                | (Running, Killed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| OrchestrationError::InvalidInput(format!("unknown job status '{s}'")))
    }
}

/// Lifecycle of a task: `SUBMITTED -> RUNNING -> {SUCCESS | FAILED}`.
///
/// `SUBMITTED -> FAILED` is only taken when a job is cancelled or abandoned
/// before the task was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Submitted,
    Running,
    Success,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Submitted,
        TaskStatus::Running,
        TaskStatus::Success,
        TaskStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Submitted => "SUBMITTED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Submitted, Running) | (Submitted, Failed) | (Running, Success) | (Running, Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| OrchestrationError::InvalidInput(format!("unknown task status '{s}'")))
    }
}

/// Result a worker reports for a finished task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    Success,
    Failed,
}

impl From<TaskOutcome> for TaskStatus {
    fn from(outcome: TaskOutcome) -> Self {
        match outcome {
            TaskOutcome::Success => TaskStatus::Success,
            TaskOutcome::Failed => TaskStatus::Failed,
        }
    }
}
