use std::path::Path;

use crate::config::schema::OrchestrationConfig;
use crate::error::ConfigError;

const SUPPORTED_DATABASE_TYPES: &[&str] = &["sqlite"];

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<OrchestrationConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<OrchestrationConfig, ConfigError> {
    if content.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "Config file is empty".to_string(),
        });
    }

    let config: OrchestrationConfig = serde_yaml::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &OrchestrationConfig) -> Result<(), ConfigError> {
    let db = &config.database;
    if !SUPPORTED_DATABASE_TYPES.contains(&db.db_type.as_str()) {
        return Err(ConfigError::Validation {
            message: format!(
                "Unsupported database type '{}', expected one of: {}",
                db.db_type,
                SUPPORTED_DATABASE_TYPES.join(", ")
            ),
        });
    }

    if db.path.as_os_str().is_empty() {
        return Err(ConfigError::Validation {
            message: "database.path must not be empty".to_string(),
        });
    }

    if config.scheduler.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "scheduler.worker_count must be at least 1".to_string(),
        });
    }

    if config.scheduler.poll_interval_ms == 0 {
        return Err(ConfigError::Validation {
            message: "scheduler.poll_interval_ms must be at least 1".to_string(),
        });
    }

    Ok(())
}
