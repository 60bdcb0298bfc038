use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::model::FailurePolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Connection settings of the orchestration store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(rename = "type", default = "default_database_type")]
    pub db_type: String,
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_database_type() -> String {
    "sqlite".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            worker_count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}
