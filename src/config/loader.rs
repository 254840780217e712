//! Configuration loader with environment variable expansion and overrides

use super::{expand_env_vars, Config, ConfigError};
use std::path::Path;

/// Environment variables that override file values, applied after parsing
const ENV_REGION: &str = "SQUIRRELUP_S3_REGION";
const ENV_ID: &str = "SQUIRRELUP_S3_ID";
const ENV_SECRET: &str = "SQUIRRELUP_S3_SECRET";
const ENV_TOKEN: &str = "SQUIRRELUP_S3_TOKEN";
const ENV_ENDPOINT: &str = "SQUIRRELUP_S3_ENDPOINT";
const ENV_BACKUP_HOURS: &str = "SQUIRRELUP_BACKUP_HOURS";
const ENV_BACKUP_FILENAME: &str = "SQUIRRELUP_BACKUP_FILENAME";
const ENV_PUBKEY: &str = "SQUIRRELUP_PUBKEY";

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    ///
    /// A missing file is not an error: defaults plus environment overrides
    /// are used instead.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_yaml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file not found, using defaults");
                Self::finish(Config::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Config, ConfigError> {
        let expanded = expand_env_vars(content);
        let config: Config = if expanded.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(&expanded)?
        };
        Self::finish(config)
    }

    fn finish(mut config: Config) -> Result<Config, ConfigError> {
        Self::apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Overwrite fields from `SQUIRRELUP_*` variables that are set
    fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
        if let Ok(value) = std::env::var(ENV_REGION) {
            config.s3.region = value;
        }
        if let Ok(value) = std::env::var(ENV_ID) {
            config.s3.id = value;
        }
        if let Ok(value) = std::env::var(ENV_SECRET) {
            config.s3.secret = value;
        }
        if let Ok(value) = std::env::var(ENV_TOKEN) {
            config.s3.token = value;
        }
        if let Ok(value) = std::env::var(ENV_ENDPOINT) {
            config.s3.endpoint = if value.is_empty() { None } else { Some(value) };
        }
        if let Ok(value) = std::env::var(ENV_BACKUP_HOURS) {
            config.backup.hours = value.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "{} must be a number, got '{}'",
                    ENV_BACKUP_HOURS, value
                ))
            })?;
        }
        if let Ok(value) = std::env::var(ENV_BACKUP_FILENAME) {
            config.backup.name = value;
        }
        if let Ok(value) = std::env::var(ENV_PUBKEY) {
            config.encryption.pubkey = value;
        }
        Ok(())
    }
}
