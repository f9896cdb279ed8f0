//! Logging configuration and initialization
//!
//! Centralized logging setup using the `tracing` ecosystem, with
//! human-readable or JSON output selected through environment variables.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: standard tracing filter (e.g. "info", "debug,memforge=trace")
//! - `MEMFORGE_LOG_LEVEL`: simple log level (error, warn, info, debug, trace)
//! - `MEMFORGE_LOG_FORMAT`: output format ("human" or "json")

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Global flag to track if tracing has been initialized
static TRACING_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Default log level when no environment variable is set
const DEFAULT_LOG_LEVEL: &str = "info";

/// Environment variable for log level override
const LOG_LEVEL_ENV: &str = "MEMFORGE_LOG_LEVEL";

/// Environment variable for log format (json/human)
const LOG_FORMAT_ENV: &str = "MEMFORGE_LOG_FORMAT";

/// Errors that can occur during logging initialization
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("invalid log format: {0}")]
    InvalidLogFormat(String),

    #[error("logging already initialized")]
    AlreadyInitialized,
}

/// Output format for log records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "human" | "text" => Ok(LogFormat::Human),
            "json" => Ok(LogFormat::Json),
            other => Err(LoggingError::InvalidLogFormat(other.to_string())),
        }
    }
}

/// Initialize logging from the environment. Safe to call once per process;
/// subsequent calls report `AlreadyInitialized`.
pub fn init() -> Result<(), LoggingError> {
    let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());
    let format = std::env::var(LOG_FORMAT_ENV)
        .ok()
        .map(|value| value.parse::<LogFormat>())
        .transpose()?
        .unwrap_or_default();
    init_with(&level, format)
}

/// Initialize logging with an explicit level and format.
pub fn init_with(level: &str, format: LogFormat) -> Result<(), LoggingError> {
    validate_level(level)?;
    if TRACING_INITIALIZED.set(()).is_err() {
        return Err(LoggingError::AlreadyInitialized);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("memforge={}", level)));

    match format {
        LogFormat::Human => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
    }
    tracing::debug!("logging initialized at level '{}'", level);
    Ok(())
}

fn validate_level(level: &str) -> Result<(), LoggingError> {
    match level.to_ascii_lowercase().as_str() {
        "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
        other => Err(LoggingError::InvalidLogLevel(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!("human".parse::<LogFormat>().unwrap(), LogFormat::Human);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_level_validation() {
        assert!(validate_level("trace").is_ok());
        assert!(validate_level("INFO").is_ok());
        assert!(validate_level("loud").is_err());
    }
}
