use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use job_orchestration::db::{migrations, Database};
use job_orchestration::error::InitError;
use job_orchestration::logging::{init_logging, LogFormat};
use job_orchestration::load_config;

#[derive(Parser, Debug)]
#[command(name = "initialize-orchestration-db")]
#[command(version)]
#[command(about = "Creates the job orchestration tables if they do not exist")]
struct Args {
    /// Path to the orchestration YAML config
    #[arg(short, long)]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn initialize(config_path: &Path) -> Result<(), InitError> {
    let config = load_config(config_path)?;
    info!(
        path = %config.database.path.display(),
        busy_timeout_ms = config.database.busy_timeout_ms,
        "Initializing orchestration database"
    );

    let db = Database::connect(&config.database)?;
    let version = db.with_conn(migrations::schema_version)?;
    info!(
        schema_version = version,
        tables = ?migrations::TABLES,
        "Orchestration tables are ready"
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.log_format) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    match initialize(&args.config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(config = %args.config.display(), error = %e, "Failed to initialize orchestration database");
            ExitCode::FAILURE
        }
    }
}
