use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level `{level}`: {reason}")]
    InvalidLogLevel { level: String, reason: String },
    #[error("failed to initialize logging: {0}")]
    Init(String),
}

/// Installs the global subscriber: human-readable output on stderr, filtered by
/// `LOG_LEVEL` (any `EnvFilter` directive, default `info`).
pub fn init_logging() -> Result<(), LoggingError> {
    let level = std::env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_new(&level).map_err(|e| LoggingError::InvalidLogLevel {
        level: level.clone(),
        reason: e.to_string(),
    })?;

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(console)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))
}
