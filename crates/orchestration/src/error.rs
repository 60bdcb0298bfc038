use std::path::PathBuf;
use thiserror::Error;

use crate::db::DatabaseError;

/// Errors returned by the job/task stores and the scheduler core.
#[derive(Error, Debug)]
pub enum OrchestrationError {
    /// The requested state change is illegal from the current state.
    #[error("Invalid transition for {entity} {id}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id: i64,
        from: String,
        to: String,
    },

    #[error("Referential violation: {0}")]
    ReferentialViolation(String),

    /// The database could not be reached or stayed locked past the busy timeout.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("{field} is {size} bytes, limit is {limit}")]
    ConfigTooLarge {
        field: &'static str,
        size: usize,
        limit: usize,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Database error: {0}")]
    Database(DatabaseError),
}

impl OrchestrationError {
    pub(crate) fn invalid_transition(
        entity: &'static str,
        id: i64,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            id,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Whether the caller may simply re-read state and decide again.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::StoreUnavailable(_)
        )
    }
}

impl From<DatabaseError> for OrchestrationError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Sqlite(e) => e.into(),
            DatabaseError::LockPoisoned => Self::StoreUnavailable("database lock poisoned".into()),
            other => Self::Database(other),
        }
    }
}

impl From<rusqlite::Error> for OrchestrationError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match err.sqlite_error_code() {
            Some(
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure,
            ) => Self::StoreUnavailable(err.to_string()),
            Some(ErrorCode::ConstraintViolation)
                if err.to_string().contains("FOREIGN KEY") =>
            {
                Self::ReferentialViolation(err.to_string())
            }
            _ => Self::Database(DatabaseError::Sqlite(err)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Failures of the schema initialization command.
#[derive(Error, Debug)]
pub enum InitError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Failed to set up logging: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, OrchestrationError>;
