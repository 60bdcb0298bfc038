//! Shared test utilities for orchestration integration tests.
//!
//! `TestHarness` owns a temporary directory holding a file-backed database
//! and, when needed, a YAML config pointing at it.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use job_orchestration::{
    Database, FailurePolicy, JobId, JobKind, JobSubmission, Scheduler, TaskSpec,
};

pub struct TestHarness {
    temp_dir: TempDir,
    /// Path of the SQLite file inside the temp dir.
    pub db_path: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("data").join("orchestration.db");
        Self { temp_dir, db_path }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Opens a new handle on the harness database. Every call returns an
    /// independent connection, like a separate process would have.
    pub fn open(&self) -> Database {
        Database::open(&self.db_path).expect("Failed to open test database")
    }

    pub fn scheduler(&self, policy: FailurePolicy) -> Scheduler {
        Scheduler::new(self.open(), policy)
    }

    /// Writes a config file for the harness database and returns its path.
    pub fn write_config(&self) -> PathBuf {
        self.write_config_str(&format!(
            "database:\n  type: sqlite\n  path: {}\n  busy_timeout_ms: 5000\n",
            self.db_path.display()
        ))
    }

    pub fn write_config_str(&self, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join("orchestration.yaml");
        std::fs::write(&path, content).expect("Failed to write config file");
        path
    }
}

pub fn search_specs(n: usize) -> Vec<TaskSpec> {
    (0..n).map(|i| TaskSpec::search(format!("archive-{i:04}"))).collect()
}

pub fn submit_search_job(scheduler: &Scheduler, tasks: usize) -> JobId {
    scheduler
        .submit(
            JobKind::Search,
            &JobSubmission::new(b"{\"query\":\"error\"}".to_vec()),
            &search_specs(tasks),
        )
        .expect("Failed to submit search job")
}
