//! Backblaze B2 backend
//!
//! Talks to B2 through its S3-compatible API. Objects are addressed as
//! `b2://<bucket>/<key>`; a key ending in `/` is treated as a prefix.

use super::{classify, BackendError, FileInfo, ObjectAddress, StorageBackend};
use crate::config::Config;
use crate::metrics;
use crate::progress::{ContentSource, ProgressReporter};
use crate::s3::{ObjectStoreApi, SdkObjectStore};
use crate::upload::{Delay, UploadEngine, UploadSettings};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Storage backend for `b2://` URIs
#[derive(Clone)]
pub struct B2Backend {
    api: Arc<dyn ObjectStoreApi>,
    engine: UploadEngine,
}

impl B2Backend {
    /// Build the backend from the `s3` and `upload` configuration sections
    pub async fn from_config(config: &Config) -> Self {
        let attempt_timeout = config
            .upload
            .attempt_timeout_seconds
            .map(Duration::from_secs);
        let api = SdkObjectStore::new(&config.s3, attempt_timeout).await;
        Self::with_api(Arc::new(api), UploadSettings::from(&config.upload))
    }

    /// Build the backend on top of an arbitrary object store
    pub fn with_api(api: Arc<dyn ObjectStoreApi>, settings: UploadSettings) -> Self {
        let engine = UploadEngine::new(api.clone(), settings);
        Self { api, engine }
    }

    /// Replace the pause strategy between part attempts
    pub fn with_delay(mut self, delay: Arc<dyn Delay>) -> Self {
        self.engine = self.engine.with_delay(delay);
        self
    }

    /// Enable per-part progress reporting
    pub fn with_progress(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.engine = self.engine.with_progress(reporter);
        self
    }

    pub fn progress_enabled(&self) -> bool {
        self.engine.progress_enabled()
    }

    pub fn settings(&self) -> &UploadSettings {
        self.engine.settings()
    }
}

fn size_from(reported: i64) -> u64 {
    u64::try_from(reported).unwrap_or(0)
}

/// Parse a URI that must name a single object, not a prefix
fn object_address(uri: &Url) -> Result<ObjectAddress, BackendError> {
    let address = ObjectAddress::parse(uri)?;
    if address.is_prefix() {
        return Err(BackendError::InvalidUri(format!(
            "{}: prefix address, expected an object key",
            uri
        )));
    }
    Ok(address)
}

#[async_trait]
impl StorageBackend for B2Backend {
    #[tracing::instrument(name = "b2.get_file_info", skip(self), fields(uri = %uri), err)]
    async fn get_file_info(&self, uri: &Url) -> Result<FileInfo, BackendError> {
        let address = ObjectAddress::parse(uri)?;

        if address.is_prefix() {
            let files = self.list_files(uri).await?;
            let size = files.iter().map(FileInfo::size).sum();
            let modified = files
                .iter()
                .map(FileInfo::modified)
                .fold(DateTime::<Utc>::UNIX_EPOCH, |latest, m| latest.max(m));

            return Ok(FileInfo::new(address.key, size, modified, false));
        }

        let head = self
            .api
            .head_object(&address.bucket, &address.key)
            .await
            .map_err(|e| classify(&e))?;

        if head.content_length < 0 {
            tracing::warn!(
                key = %address.key,
                content_length = head.content_length,
                "HeadObject reported a negative content length"
            );
            return Err(BackendError::InvalidFileInfo);
        }

        Ok(FileInfo::new(
            address.key,
            head.content_length as u64,
            head.last_modified,
            true,
        ))
    }

    #[tracing::instrument(name = "b2.list_files", skip(self), fields(uri = %uri), err)]
    async fn list_files(&self, uri: &Url) -> Result<Vec<FileInfo>, BackendError> {
        let address = ObjectAddress::parse(uri)?;

        let objects = self
            .api
            .list_objects(&address.bucket, &address.key)
            .await
            .map_err(|e| classify(&e))?;

        Ok(objects
            .into_iter()
            .map(|object| {
                FileInfo::new(object.key, size_from(object.size), object.last_modified, true)
            })
            .collect())
    }

    async fn store_file(
        &self,
        content: Arc<dyn ContentSource>,
        content_length: u64,
        uri: &Url,
    ) -> Result<(), BackendError> {
        let address = match object_address(uri) {
            Ok(address) => address,
            Err(e) => {
                metrics::record_error(&e);
                return Err(e);
            }
        };

        self.engine
            .store(content, content_length, &address.bucket, &address.key)
            .await
    }

    #[tracing::instrument(name = "b2.remove_file", skip(self), fields(uri = %uri), err)]
    async fn remove_file(&self, uri: &Url) -> Result<(), BackendError> {
        let address = object_address(uri)?;

        let head = self
            .api
            .head_object(&address.bucket, &address.key)
            .await
            .map_err(|e| classify(&e))?;

        self.api
            .delete_object(&address.bucket, &address.key, head.version_id)
            .await
            .map_err(|e| classify(&e))?;

        tracing::info!(key = %address.key, "Removed object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::{ApiError, ListedObject, MockObjectStoreApi, ObjectHead};
    use crate::upload::NoDelay;
    use bytes::Bytes;
    use mockall::predicate::eq;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn backend(mock: MockObjectStoreApi) -> B2Backend {
        B2Backend::with_api(Arc::new(mock), UploadSettings::default()).with_delay(Arc::new(NoDelay))
    }

    fn uri(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn prefix_listing() -> Vec<ListedObject> {
        vec![
            ListedObject {
                key: "valid/prefix/key1".into(),
                size: 1,
                last_modified: ts(1),
            },
            ListedObject {
                key: "valid/prefix/key2".into(),
                size: 2,
                last_modified: ts(2),
            },
        ]
    }

    #[tokio::test]
    async fn test_get_file_info_valid_key() {
        let mut mock = MockObjectStoreApi::new();
        mock.expect_head_object()
            .with(eq("test-bucket"), eq("valid/key"))
            .times(1)
            .returning(|_, _| {
                Ok(ObjectHead {
                    content_length: 1,
                    last_modified: ts(1),
                    version_id: None,
                })
            });

        let info = backend(mock)
            .get_file_info(&uri("b2://test-bucket/valid/key"))
            .await
            .unwrap();

        assert_eq!(info.name(), "valid/key");
        assert_eq!(info.size(), 1);
        assert_eq!(info.modified(), ts(1));
        assert!(info.is_file());
    }

    #[tokio::test]
    async fn test_get_file_info_valid_prefix_aggregates() {
        let mut mock = MockObjectStoreApi::new();
        mock.expect_list_objects()
            .with(eq("test-bucket"), eq("valid/prefix/"))
            .times(1)
            .returning(|_, _| Ok(prefix_listing()));
        mock.expect_head_object().never();

        let info = backend(mock)
            .get_file_info(&uri("b2://test-bucket/valid/prefix/"))
            .await
            .unwrap();

        assert_eq!(info.name(), "valid/prefix/");
        assert_eq!(info.size(), 3);
        assert_eq!(info.modified(), ts(2));
        assert!(!info.is_file());
    }

    #[tokio::test]
    async fn test_get_file_info_empty_prefix() {
        let mut mock = MockObjectStoreApi::new();
        mock.expect_list_objects().returning(|_, _| Ok(Vec::new()));

        let info = backend(mock)
            .get_file_info(&uri("b2://test-bucket/empty/prefix/"))
            .await
            .unwrap();

        assert_eq!(info.size(), 0);
        assert_eq!(info.modified(), DateTime::<Utc>::UNIX_EPOCH);
        assert!(!info.is_file());
    }

    #[tokio::test]
    async fn test_get_file_info_invalid_key() {
        let mut mock = MockObjectStoreApi::new();
        mock.expect_head_object()
            .returning(|_, _| Err(ApiError::new("NotFound", "Not Found")));

        let err = backend(mock)
            .get_file_info(&uri("b2://test-bucket/invalid/key"))
            .await
            .unwrap_err();

        assert_eq!(err, BackendError::FileNotFound);
        assert_eq!(err.to_string(), "file not found");
    }

    #[tokio::test]
    async fn test_get_file_info_invalid_prefix() {
        let mut mock = MockObjectStoreApi::new();
        mock.expect_list_objects()
            .returning(|_, _| Err(ApiError::new("NoSuchBucket", "bucket does not exist")));

        let err = backend(mock)
            .get_file_info(&uri("b2://test-bucket/invalid/prefix/"))
            .await
            .unwrap_err();

        assert_eq!(err, BackendError::FileNotFound);
    }

    #[tokio::test]
    async fn test_get_file_info_negative_size() {
        let mut mock = MockObjectStoreApi::new();
        mock.expect_head_object().returning(|_, _| {
            Ok(ObjectHead {
                content_length: -1,
                last_modified: ts(1),
                version_id: Some("invalid-key-size-version".into()),
            })
        });

        let err = backend(mock)
            .get_file_info(&uri("b2://test-bucket/invalid/key/size"))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "invalid file info");
    }

    #[tokio::test]
    async fn test_list_files_valid_prefix() {
        let mut mock = MockObjectStoreApi::new();
        mock.expect_list_objects()
            .returning(|_, _| Ok(prefix_listing()));

        let files = backend(mock)
            .list_files(&uri("b2://test-bucket/valid/prefix/"))
            .await
            .unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name(), "valid/prefix/key1");
        assert_eq!(files[0].size(), 1);
        assert_eq!(files[1].name(), "valid/prefix/key2");
        assert_eq!(files[1].modified(), ts(2));
        assert!(files.iter().all(FileInfo::is_file));
    }

    #[tokio::test]
    async fn test_list_files_access_denied() {
        let mut mock = MockObjectStoreApi::new();
        mock.expect_list_objects()
            .returning(|_, _| Err(ApiError::new("AccessDenied", "Access Denied")));

        let err = backend(mock)
            .list_files(&uri("b2://test-bucket/restricted/"))
            .await
            .unwrap_err();

        assert_eq!(err, BackendError::AccessDenied);
    }

    #[tokio::test]
    async fn test_remove_file_uses_version_id() {
        let mut mock = MockObjectStoreApi::new();
        mock.expect_head_object().returning(|_, _| {
            Ok(ObjectHead {
                content_length: 10,
                last_modified: ts(1),
                version_id: Some("deletable-version".into()),
            })
        });
        mock.expect_delete_object()
            .with(
                eq("test-bucket"),
                eq("valid/deletable/key"),
                eq(Some("deletable-version".to_string())),
            )
            .times(1)
            .returning(|_, _, _| Ok(()));

        backend(mock)
            .remove_file(&uri("b2://test-bucket/valid/deletable/key"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_remove_file_undeletable() {
        let mut mock = MockObjectStoreApi::new();
        mock.expect_head_object().returning(|_, _| {
            Ok(ObjectHead {
                content_length: 10,
                last_modified: ts(1),
                version_id: Some("valid-undeletable-key-version".into()),
            })
        });
        mock.expect_delete_object()
            .returning(|_, _, _| Err(ApiError::new("AccessDenied", "Access Denied")));

        let err = backend(mock)
            .remove_file(&uri("b2://test-bucket/valid/undeletable/key"))
            .await
            .unwrap_err();

        assert_eq!(err, BackendError::AccessDenied);
    }

    #[tokio::test]
    async fn test_remove_file_missing_key_skips_delete() {
        let mut mock = MockObjectStoreApi::new();
        mock.expect_head_object()
            .returning(|_, _| Err(ApiError::new("NoSuchKey", "missing")));
        mock.expect_delete_object().never();

        let err = backend(mock)
            .remove_file(&uri("b2://test-bucket/invalid/key"))
            .await
            .unwrap_err();

        assert_eq!(err, BackendError::FileNotFound);
    }

    #[tokio::test]
    async fn test_store_file_small_uses_put_object() {
        let mut mock = MockObjectStoreApi::new();
        mock.expect_put_object()
            .withf(|bucket, key, body| {
                bucket == "test-bucket" && key == "valid/new/key" && body.len() == 5
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        mock.expect_create_multipart_upload().never();

        backend(mock)
            .store_file(
                Arc::new(Bytes::from_static(b"hello")),
                5,
                &uri("b2://test-bucket/valid/new/key"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_store_file_invalid_key() {
        let mut mock = MockObjectStoreApi::new();
        mock.expect_put_object()
            .returning(|_, _, _| Err(ApiError::new("AccessDenied", "Access Denied")));

        let err = backend(mock)
            .store_file(
                Arc::new(Bytes::from_static(b"hello")),
                5,
                &uri("b2://test-bucket/invalid/new/key"),
            )
            .await
            .unwrap_err();

        assert_eq!(err, BackendError::AccessDenied);
    }

    #[tokio::test]
    async fn test_store_file_missing_upload_id() {
        let mut mock = MockObjectStoreApi::new();
        mock.expect_create_multipart_upload()
            .returning(|_, _| Ok(None));
        mock.expect_upload_part().never();

        let settings = UploadSettings {
            single_shot_threshold: 2,
            part_size: 2,
            ..UploadSettings::default()
        };
        let backend = B2Backend::with_api(Arc::new(mock), settings);

        let err = backend
            .store_file(
                Arc::new(Bytes::from_static(b"hello")),
                5,
                &uri("b2://test-bucket/valid/new/multipart/key"),
            )
            .await
            .unwrap_err();

        assert_eq!(err, BackendError::MissingUploadId);
    }

    #[tokio::test]
    async fn test_store_file_rejects_prefix_addresses() {
        for target in ["b2://test-bucket/valid/prefix/", "b2://test-bucket", "b2://test-bucket/"] {
            let mut mock = MockObjectStoreApi::new();
            mock.expect_put_object().never();
            mock.expect_create_multipart_upload().never();

            let err = backend(mock)
                .store_file(Arc::new(Bytes::from_static(b"hello")), 5, &uri(target))
                .await
                .unwrap_err();

            assert!(matches!(err, BackendError::InvalidUri(_)), "{}: {:?}", target, err);
        }
    }

    #[tokio::test]
    async fn test_remove_file_rejects_prefix_addresses() {
        for target in ["b2://test-bucket/valid/prefix/", "b2://test-bucket"] {
            let mut mock = MockObjectStoreApi::new();
            mock.expect_head_object().never();
            mock.expect_delete_object().never();

            let err = backend(mock).remove_file(&uri(target)).await.unwrap_err();

            assert!(matches!(err, BackendError::InvalidUri(_)), "{}: {:?}", target, err);
        }
    }

    #[test]
    fn test_progress_toggle() {
        let mock = MockObjectStoreApi::new();
        let backend = backend(mock);
        assert!(!backend.progress_enabled());

        let backend =
            backend.with_progress(Arc::new(crate::progress::NoopProgressReporter));
        assert!(backend.progress_enabled());
    }

    #[test]
    fn test_size_from_clamps_negative() {
        assert_eq!(size_from(-5), 0);
        assert_eq!(size_from(42), 42);
    }
}
