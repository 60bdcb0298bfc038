//! Subscriber setup for binaries embedding the orchestration core.

use clap::ValueEnum;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::error::InitError;

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Installs the global subscriber. `log` records from the store layer are
/// forwarded into tracing. The filter comes from `RUST_LOG`, default `info`.
pub fn init_logging(format: LogFormat) -> Result<(), InitError> {
    tracing_log::LogTracer::init().map_err(|e| InitError::Logging(e.to_string()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = Registry::default().with(filter);

    let result = match format {
        LogFormat::Text => {
            tracing::subscriber::set_global_default(registry.with(fmt::layer().with_target(false)))
        }
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_current_span(true)),
        ),
    };
    result.map_err(|e| InitError::Logging(e.to_string()))
}
