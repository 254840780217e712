//! S3 API module
//!
//! Defines the object-storage seam that backends talk to, plus the
//! aws-sdk-s3 implementation used against Backblaze B2.
//!
//! # Design
//!
//! - `ObjectStoreApi` trait covers exactly the calls the backend issues
//! - Every call fails with an [`ApiError`] carrying the service error code,
//!   which the storage layer classifies into its own taxonomy
//! - `SdkObjectStore` is the production implementation; tests substitute
//!   their own
//!
//! # Operations
//!
//! | Operation | Span Name | Attributes |
//! |-----------|-----------|------------|
//! | HeadObject | `s3.head_object` | bucket, key |
//! | ListObjectsV2 | `s3.list_objects` | bucket, prefix, objects |
//! | PutObject | `s3.put_object` | bucket, key, bytes |
//! | DeleteObject | `s3.delete_object` | bucket, key, version_id |
//! | CreateMultipartUpload | `s3.create_multipart_upload` | bucket, key, upload_id |
//! | UploadPart | `s3.upload_part` | bucket, upload_id, part_number, bytes, etag |
//! | CompleteMultipartUpload | `s3.complete_multipart_upload` | bucket, upload_id, parts_count |
//! | AbortMultipartUpload | `s3.abort_multipart_upload` | bucket, upload_id |

use crate::progress::ProgressSection;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod body;
pub mod client;
pub mod credentials;

pub use client::SdkObjectStore;
pub use credentials::{CredentialsError, CredentialsProvider};

/// Error returned by an object-storage call
///
/// `code` is the service (or client-side) error code such as `NoSuchKey`
/// or `RequestTimeout`; `message` is the accompanying human-readable text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Metadata returned by HeadObject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    /// Reported content length; negative when the service reported garbage
    pub content_length: i64,
    pub last_modified: DateTime<Utc>,
    pub version_id: Option<String>,
}

/// One entry of a ListObjectsV2 response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    pub key: String,
    pub size: i64,
    pub last_modified: DateTime<Utc>,
}

/// A part accepted by the service, ready for CompleteMultipartUpload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// Object-storage calls used by the storage backends
///
/// Implementations must be safe for concurrent use: a single handle is
/// shared by every part upload of a multipart session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStoreApi: Send + Sync {
    /// Fetch object metadata
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead, ApiError>;

    /// List every object whose key starts with `prefix`, in service order
    async fn list_objects(&self, bucket: &str, prefix: &str)
        -> Result<Vec<ListedObject>, ApiError>;

    /// Upload a whole object in one request
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ProgressSection,
    ) -> Result<(), ApiError>;

    /// Delete an object, optionally pinned to a version
    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<String>,
    ) -> Result<(), ApiError>;

    /// Start a multipart session; `None` means the service omitted the upload id
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<String>, ApiError>;

    /// Upload one part and return its ETag
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: ProgressSection,
    ) -> Result<String, ApiError>;

    /// Finalize a session; `parts` must be in ascending part-number order
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), ApiError>;

    /// Discard a session and any parts uploaded to it
    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = ApiError::new("NoSuchKey", "The specified key does not exist.");
        assert_eq!(err.to_string(), "NoSuchKey: The specified key does not exist.");
    }
}
