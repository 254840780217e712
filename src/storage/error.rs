//! Backend error taxonomy
//!
//! Every failure reported by an object-storage call is run through
//! [`classify`] before it reaches a caller, so callers only ever match on
//! [`BackendError`] and never on transport-specific codes.

use crate::s3::ApiError;
use thiserror::Error;

/// Domain errors surfaced by storage backends
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("file not found")]
    FileNotFound,

    #[error("access denied")]
    AccessDenied,

    #[error("invalid backend configuration")]
    InvalidConfig,

    #[error("operation timeout")]
    OperationTimeout,

    #[error("unknown B2 error ({code}: {message}).")]
    Unknown { code: String, message: String },

    #[error("invalid file info")]
    InvalidFileInfo,

    #[error("multipart upload failed: no upload id found in server response")]
    MissingUploadId,

    #[error("multipart upload failed: {received} of {expected} parts reported a result")]
    MissingPartResults { expected: u32, received: u32 },

    #[error("invalid URI: {0}")]
    InvalidUri(String),

    #[error("unknown URL scheme {0}")]
    UnsupportedScheme(String),
}

impl BackendError {
    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::FileNotFound => "file_not_found",
            BackendError::AccessDenied => "access_denied",
            BackendError::InvalidConfig => "invalid_config",
            BackendError::OperationTimeout => "operation_timeout",
            BackendError::Unknown { .. } => "unknown",
            BackendError::InvalidFileInfo => "invalid_file_info",
            BackendError::MissingUploadId => "missing_upload_id",
            BackendError::MissingPartResults { .. } => "missing_part_results",
            BackendError::InvalidUri(_) => "invalid_uri",
            BackendError::UnsupportedScheme(_) => "unsupported_scheme",
        }
    }
}

/// Map an object-storage API error onto the domain taxonomy.
///
/// The mapping is total: unrecognised codes become [`BackendError::Unknown`]
/// carrying the original code and message.
pub fn classify(err: &ApiError) -> BackendError {
    match err.code.as_str() {
        "NotFound" | "NoSuchBucket" | "NoSuchKey" => BackendError::FileNotFound,
        "AccessDenied" => BackendError::AccessDenied,
        "MissingRegion" | "EmptyStaticCreds" | "InvalidAccessKeyId" => {
            BackendError::InvalidConfig
        }
        "RequestTimeout" => BackendError::OperationTimeout,
        _ => BackendError::Unknown {
            code: err.code.clone(),
            message: err.message.clone(),
        },
    }
}

impl From<ApiError> for BackendError {
    fn from(err: ApiError) -> Self {
        classify(&err)
    }
}
