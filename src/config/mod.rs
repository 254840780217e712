//! Configuration module for SquirrelUp
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion, `SQUIRRELUP_*` overrides and validation.

use crate::upload::{
    DEFAULT_CONCURRENT_PARTS, DEFAULT_MAX_ATTEMPTS, DEFAULT_PART_SIZE, DEFAULT_RETRY_WAIT,
    DEFAULT_SINGLE_SHOT_THRESHOLD, MAX_SINGLE_PUT_SIZE, MIN_PART_SIZE,
};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

lazy_static! {
    static ref ENV_VAR_PATTERN: regex_lite::Regex =
        regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .expect("environment variable pattern is valid");
}

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("MY_VAR", "value");
/// let result = expand_env_vars("prefix-${MY_VAR}-suffix");
/// assert_eq!(result, "prefix-value-suffix");
///
/// let result = expand_env_vars("${MISSING:-default}");
/// assert_eq!(result, "default");
/// ```
fn expand_env_vars(s: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(s, |cap: &regex_lite::Captures<'_>| {
            match std::env::var(&cap[1]) {
                Ok(value) => value,
                Err(_) => match cap.get(2) {
                    Some(default) => default.as_str().to_string(),
                    // No env var and no default. Keep the original placeholder.
                    None => cap[0].to_string(),
                },
            }
        })
        .into_owned()
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file; a missing file yields the defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    ///
    /// Region and credentials are deliberately left alone: the object store
    /// reports them on first use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upload.part_size < MIN_PART_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "upload.part_size must be at least {} bytes, got {}",
                MIN_PART_SIZE, self.upload.part_size
            )));
        }

        if self.upload.single_shot_threshold > MAX_SINGLE_PUT_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "upload.single_shot_threshold must be at most {} bytes, got {}",
                MAX_SINGLE_PUT_SIZE, self.upload.single_shot_threshold
            )));
        }

        if self.upload.concurrent_parts == 0 {
            return Err(ConfigError::ValidationError(
                "upload.concurrent_parts must be greater than zero".into(),
            ));
        }

        if self.upload.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "upload.max_attempts must be greater than zero".into(),
            ));
        }

        if !self.backup.hours.is_finite() {
            return Err(ConfigError::ValidationError(format!(
                "backup.hours must be a finite number, got {}",
                self.backup.hours
            )));
        }

        if self.backup.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "backup.name cannot be empty".into(),
            ));
        }

        if let Some(ref endpoint) = self.s3.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid s3.endpoint '{}': must start with http:// or https://",
                    endpoint
                )));
            }
        }

        Ok(())
    }
}

/// S3 (Backblaze B2) connection configuration
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub secret: String,
    /// Session token; empty when static keys are used
    #[serde(default)]
    pub token: String,
    /// Overrides `https://s3.<region>.backblazeb2.com`
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("region", &self.region)
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .field("token", &if self.token.is_empty() { "" } else { "<redacted>" })
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Backup rotation and naming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Remote backups at least this old are removed; `<= 0` disables rotation
    #[serde(default = "default_backup_hours")]
    pub hours: f64,
    /// chrono format string for the uploaded file name
    #[serde(default = "default_backup_name")]
    pub name: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            hours: default_backup_hours(),
            name: default_backup_name(),
        }
    }
}

fn default_backup_hours() -> f64 {
    240.0
}

fn default_backup_name() -> String {
    "%Y-%m-%dT%H%z".to_string()
}

/// Upload configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_single_shot_threshold")]
    pub single_shot_threshold: u64,
    #[serde(default = "default_part_size")]
    pub part_size: u64,
    #[serde(default = "default_concurrent_parts")]
    pub concurrent_parts: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_wait_seconds")]
    pub retry_wait_seconds: u64,
    /// Per-attempt timeout applied by the S3 client
    #[serde(default)]
    pub attempt_timeout_seconds: Option<u64>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            single_shot_threshold: default_single_shot_threshold(),
            part_size: default_part_size(),
            concurrent_parts: default_concurrent_parts(),
            max_attempts: default_max_attempts(),
            retry_wait_seconds: default_retry_wait_seconds(),
            attempt_timeout_seconds: None,
        }
    }
}

fn default_single_shot_threshold() -> u64 {
    DEFAULT_SINGLE_SHOT_THRESHOLD
}

fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_concurrent_parts() -> usize {
    DEFAULT_CONCURRENT_PARTS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_wait_seconds() -> u64 {
    DEFAULT_RETRY_WAIT.as_secs()
}

/// Archive encryption
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// age X25519 recipient (`age1...`) or path to a recipients file;
    /// empty disables encryption
    #[serde(default)]
    pub pubkey: String,
}

/// Log output configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
