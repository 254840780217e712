//! aws-sdk-s3 implementation of [`ObjectStoreApi`]
//!
//! Talks to Backblaze B2 through its S3-compatible endpoint
//! (`https://s3.<region>.backblazeb2.com`) with path-style addressing.

use super::body::byte_stream;
use super::credentials::{CredentialsError, CredentialsProvider};
use super::{ApiError, CompletedPart, ListedObject, ObjectHead, ObjectStoreApi};
use crate::config::S3Config;
use crate::progress::ProgressSection;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{Region, RequestChecksumCalculation, ResponseChecksumValidation};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as SdkCompletedPart};
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Endpoint for a B2 region
pub fn b2_endpoint(region: &str) -> String {
    format!("https://s3.{}.backblazeb2.com", region)
}

/// Object store backed by the AWS SDK S3 client
///
/// The client handle is cheap to clone and safe for concurrent use.
#[derive(Clone, Debug)]
pub struct SdkObjectStore {
    client: Client,
    endpoint: String,
    region: String,
    misconfigured: Option<CredentialsError>,
}

impl SdkObjectStore {
    /// Build a client from the `s3` configuration section
    ///
    /// Incomplete configuration does not fail here; every call then fails
    /// with the matching configuration error code instead.
    pub async fn new(config: &S3Config, attempt_timeout: Option<Duration>) -> Self {
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| b2_endpoint(&config.region));

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(&endpoint);

        let misconfigured = match CredentialsProvider::from_config(config) {
            Ok(credentials) => {
                loader = loader.credentials_provider(credentials);
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "S3 client configured without usable credentials");
                Some(e)
            }
        };

        if let Some(timeout) = attempt_timeout {
            loader = loader.timeout_config(
                TimeoutConfig::builder()
                    .operation_attempt_timeout(timeout)
                    .build(),
            );
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            // B2 rejects the default aws-chunked checksum trailers.
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .response_checksum_validation(ResponseChecksumValidation::WhenRequired)
            .build();

        tracing::debug!(endpoint = %endpoint, region = %config.region, "Created S3 client");

        Self {
            client: Client::from_conf(s3_config),
            endpoint,
            region: config.region.clone(),
            misconfigured,
        }
    }

    /// Endpoint URL requests are sent to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Configured region
    pub fn region(&self) -> &str {
        &self.region
    }

    fn preflight(&self) -> Result<(), ApiError> {
        match &self.misconfigured {
            Some(e) => Err(e.clone().into()),
            None => Ok(()),
        }
    }
}

/// Convert an SDK error into the service code + message pair
fn api_error<E, R>(err: SdkError<E, R>) -> ApiError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::ServiceError(service) => {
            let inner = service.err();
            ApiError::new(
                inner.code().unwrap_or("Unknown"),
                inner.message().unwrap_or_default(),
            )
        }
        SdkError::TimeoutError(_) => ApiError::new("RequestTimeout", "request timed out"),
        SdkError::DispatchFailure(failure) if failure.is_timeout() => {
            ApiError::new("RequestTimeout", DisplayErrorContext(&err).to_string())
        }
        SdkError::DispatchFailure(_) => {
            ApiError::new("DispatchFailure", DisplayErrorContext(&err).to_string())
        }
        SdkError::ConstructionFailure(_) => {
            ApiError::new("ConstructionFailure", DisplayErrorContext(&err).to_string())
        }
        _ => ApiError::new("ResponseError", DisplayErrorContext(&err).to_string()),
    }
}

fn to_chrono(value: Option<&aws_sdk_s3::primitives::DateTime>) -> DateTime<Utc> {
    value
        .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[async_trait]
impl ObjectStoreApi for SdkObjectStore {
    #[tracing::instrument(
        name = "s3.head_object",
        skip(self),
        fields(s3.bucket = %bucket, s3.key = %key),
        err
    )]
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead, ApiError> {
        self.preflight()?;

        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(api_error)?;

        Ok(ObjectHead {
            content_length: output.content_length().unwrap_or(-1),
            last_modified: to_chrono(output.last_modified()),
            version_id: output.version_id().map(str::to_string),
        })
    }

    #[tracing::instrument(
        name = "s3.list_objects",
        skip(self),
        fields(s3.bucket = %bucket, s3.prefix = %prefix, objects = tracing::field::Empty),
        err
    )]
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ListedObject>, ApiError> {
        self.preflight()?;

        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(api_error)?;

            for object in output.contents() {
                objects.push(ListedObject {
                    key: object.key().unwrap_or_default().to_string(),
                    size: object.size().unwrap_or(0),
                    last_modified: to_chrono(object.last_modified()),
                });
            }

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        tracing::Span::current().record("objects", objects.len());
        Ok(objects)
    }

    #[tracing::instrument(
        name = "s3.put_object",
        skip(self, body),
        fields(s3.bucket = %bucket, s3.key = %key, upload.bytes = body.len()),
        err
    )]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ProgressSection,
    ) -> Result<(), ApiError> {
        self.preflight()?;

        let length = body.len() as i64;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(length)
            .body(byte_stream(body))
            .send()
            .await
            .map_err(api_error)?;

        Ok(())
    }

    #[tracing::instrument(
        name = "s3.delete_object",
        skip(self),
        fields(s3.bucket = %bucket, s3.key = %key, s3.version_id = ?version_id),
        err
    )]
    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<String>,
    ) -> Result<(), ApiError> {
        self.preflight()?;

        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id)
            .send()
            .await
            .map_err(api_error)?;

        Ok(())
    }

    #[tracing::instrument(
        name = "s3.create_multipart_upload",
        skip(self),
        fields(s3.bucket = %bucket, s3.key = %key, s3.upload_id = tracing::field::Empty),
        err
    )]
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<String>, ApiError> {
        self.preflight()?;

        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(api_error)?;

        let upload_id = output.upload_id().map(str::to_string);
        if let Some(id) = &upload_id {
            tracing::Span::current().record("s3.upload_id", id.as_str());
        }
        Ok(upload_id)
    }

    #[tracing::instrument(
        name = "s3.upload_part",
        skip(self, body),
        fields(
            s3.bucket = %bucket,
            s3.upload_id = %upload_id,
            s3.part_number = part_number,
            upload.bytes = body.len(),
            s3.etag = tracing::field::Empty
        ),
        err
    )]
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: ProgressSection,
    ) -> Result<String, ApiError> {
        self.preflight()?;

        let length = body.len() as i64;
        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_length(length)
            .body(byte_stream(body))
            .customize()
            // Parts are retried by the upload engine; one HTTP attempt per call.
            .config_override(aws_sdk_s3::config::Builder::new().retry_config(RetryConfig::disabled()))
            .send()
            .await
            .map_err(api_error)?;

        let etag = output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| ApiError::new("MissingETag", "no ETag in UploadPart response"))?;
        tracing::Span::current().record("s3.etag", etag.as_str());
        Ok(etag)
    }

    #[tracing::instrument(
        name = "s3.complete_multipart_upload",
        skip(self, parts),
        fields(s3.bucket = %bucket, s3.upload_id = %upload_id, parts_count = parts.len()),
        err
    )]
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), ApiError> {
        self.preflight()?;

        let parts = parts
            .into_iter()
            .map(|part| {
                SdkCompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(part.etag)
                    .build()
            })
            .collect();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(api_error)?;

        Ok(())
    }

    #[tracing::instrument(
        name = "s3.abort_multipart_upload",
        skip(self),
        fields(s3.bucket = %bucket, s3.upload_id = %upload_id),
        err
    )]
    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), ApiError> {
        self.preflight()?;

        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(api_error)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s3_config(region: &str, id: &str, secret: &str) -> S3Config {
        S3Config {
            region: region.into(),
            id: id.into(),
            secret: secret.into(),
            token: String::new(),
            endpoint: None,
        }
    }

    #[test]
    fn test_b2_endpoint() {
        assert_eq!(
            b2_endpoint("mock-region"),
            "https://s3.mock-region.backblazeb2.com"
        );
    }

    #[tokio::test]
    async fn test_default_endpoint_from_region() {
        let store = SdkObjectStore::new(&s3_config("us-west-004", "id", "secret"), None).await;
        assert_eq!(store.endpoint(), "https://s3.us-west-004.backblazeb2.com");
        assert_eq!(store.region(), "us-west-004");
    }

    #[tokio::test]
    async fn test_empty_credentials_fail_every_call() {
        let store = SdkObjectStore::new(&s3_config("us-west-004", "", ""), None).await;

        let err = store.head_object("bucket", "key").await.unwrap_err();
        assert_eq!(err.code, "EmptyStaticCreds");

        let err = store.list_objects("bucket", "prefix/").await.unwrap_err();
        assert_eq!(err.code, "EmptyStaticCreds");
    }

    #[tokio::test]
    async fn test_missing_region_fails_every_call() {
        let store = SdkObjectStore::new(&s3_config("", "id", "secret"), None).await;

        let err = store
            .abort_multipart_upload("bucket", "key", "upload")
            .await
            .unwrap_err();
        assert_eq!(err.code, "MissingRegion");
    }

    #[test]
    fn test_to_chrono_defaults_to_epoch() {
        assert_eq!(to_chrono(None), DateTime::<Utc>::UNIX_EPOCH);

        let dt = aws_sdk_s3::primitives::DateTime::from_secs(2);
        assert_eq!(to_chrono(Some(&dt)).timestamp(), 2);
    }
}
