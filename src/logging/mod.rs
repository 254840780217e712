//! Tracing subscriber setup
//!
//! Installs a registry with two layers:
//!
//! ```text
//! Registry
//!   ├── EnvFilter (RUST_LOG, falling back to logging.level)
//!   └── Fmt Layer (console output, text or JSON)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use squirrelup::config::LoggingConfig;
//! use squirrelup::logging::init_subscriber;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LoggingConfig {
//!     level: "debug".to_string(),
//!     json: false,
//! };
//!
//! init_subscriber(&config)?;
//! # Ok(())
//! # }
//! ```

use crate::config::LoggingConfig;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

/// Logging initialization errors
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{0}': {1}")]
    InvalidFilter(String, String),

    #[error("Failed to set global subscriber (may already be initialized): {0}")]
    AlreadyInitialized(String),
}

/// Build the filter from RUST_LOG, or from `level` when it is unset
pub fn build_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| LoggingError::InvalidFilter(level.to_string(), e.to_string())),
    }
}

/// Initialize the global tracing subscriber
pub fn init_subscriber(config: &LoggingConfig) -> Result<(), LoggingError> {
    let env_filter = build_filter(&config.level)?;

    let result = if config.json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_writer(std::io::stderr);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)
    };

    result.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}
