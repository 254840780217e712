//! Storage Backend Integration Tests
//!
//! Tests the public `StorageBackend` surface: the factory, the dummy backend
//! and the B2 backend over an in-memory object store.

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{DateTime, Utc};
    use squirrelup::config::Config;
    use squirrelup::progress::ProgressSection;
    use squirrelup::s3::{ApiError, CompletedPart, ListedObject, ObjectHead, ObjectStoreApi};
    use squirrelup::storage::{
        create_storage_backend, B2Backend, BackendError, DummyBackend, StorageBackend,
    };
    use squirrelup::upload::UploadSettings;
    use std::sync::Arc;
    use url::Url;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    /// Object store with a fixed listing for `test-bucket`
    struct ListingStore {
        objects: Vec<ListedObject>,
    }

    #[async_trait]
    impl ObjectStoreApi for ListingStore {
        async fn head_object(&self, _bucket: &str, key: &str) -> Result<ObjectHead, ApiError> {
            self.objects
                .iter()
                .find(|object| object.key == key)
                .map(|object| ObjectHead {
                    content_length: object.size,
                    last_modified: object.last_modified,
                    version_id: None,
                })
                .ok_or_else(|| ApiError::new("NotFound", "Not Found"))
        }

        async fn list_objects(
            &self,
            bucket: &str,
            prefix: &str,
        ) -> Result<Vec<ListedObject>, ApiError> {
            if bucket != "test-bucket" {
                return Err(ApiError::new("NoSuchBucket", "The specified bucket does not exist"));
            }
            Ok(self
                .objects
                .iter()
                .filter(|object| object.key.starts_with(prefix))
                .cloned()
                .collect())
        }

        async fn put_object(
            &self,
            _bucket: &str,
            _key: &str,
            _body: ProgressSection,
        ) -> Result<(), ApiError> {
            Err(ApiError::new("AccessDenied", "read-only"))
        }

        async fn delete_object(
            &self,
            _bucket: &str,
            _key: &str,
            _version_id: Option<String>,
        ) -> Result<(), ApiError> {
            Ok(())
        }

        async fn create_multipart_upload(
            &self,
            _bucket: &str,
            _key: &str,
        ) -> Result<Option<String>, ApiError> {
            Err(ApiError::new("AccessDenied", "read-only"))
        }

        async fn upload_part(
            &self,
            _bucket: &str,
            _key: &str,
            _upload_id: &str,
            _part_number: i32,
            _body: ProgressSection,
        ) -> Result<String, ApiError> {
            Err(ApiError::new("AccessDenied", "read-only"))
        }

        async fn complete_multipart_upload(
            &self,
            _bucket: &str,
            _key: &str,
            _upload_id: &str,
            _parts: Vec<CompletedPart>,
        ) -> Result<(), ApiError> {
            Err(ApiError::new("AccessDenied", "read-only"))
        }

        async fn abort_multipart_upload(
            &self,
            _bucket: &str,
            _key: &str,
            _upload_id: &str,
        ) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn backend() -> B2Backend {
        let store = ListingStore {
            objects: vec![
                ListedObject {
                    key: "key1".into(),
                    size: 1,
                    last_modified: ts(1),
                },
                ListedObject {
                    key: "key2".into(),
                    size: 2,
                    last_modified: ts(2),
                },
                ListedObject {
                    key: "other/key3".into(),
                    size: -7,
                    last_modified: ts(3),
                },
            ],
        };
        B2Backend::with_api(Arc::new(store), UploadSettings::default())
    }

    // ========================================================================
    // TEST: Listing
    // ========================================================================

    #[tokio::test]
    async fn test_list_files_in_service_order() {
        let uri = Url::parse("b2://test-bucket/key").unwrap();
        let files = backend().list_files(&uri).await.unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name(), "key1");
        assert_eq!(files[0].size(), 1);
        assert_eq!(files[0].modified(), ts(1));
        assert_eq!(files[1].name(), "key2");
        assert_eq!(files[1].size(), 2);
        assert_eq!(files[1].modified(), ts(2));
        assert!(files.iter().all(|f| f.is_file()));
    }

    #[tokio::test]
    async fn test_list_files_clamps_negative_size() {
        let uri = Url::parse("b2://test-bucket/other/").unwrap();
        let files = backend().list_files(&uri).await.unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size(), 0);
    }

    #[tokio::test]
    async fn test_bucket_root_is_a_prefix() {
        let uri = Url::parse("b2://test-bucket/").unwrap();
        let info = backend().get_file_info(&uri).await.unwrap();

        assert_eq!(info.name(), "");
        assert_eq!(info.size(), 3);
        assert_eq!(info.modified(), ts(3));
        assert!(!info.is_file());
    }

    #[tokio::test]
    async fn test_unknown_bucket() {
        let uri = Url::parse("b2://missing-bucket/prefix/").unwrap();
        let err = backend().list_files(&uri).await.unwrap_err();
        assert_eq!(err, BackendError::FileNotFound);
    }

    #[tokio::test]
    async fn test_store_error_is_classified() {
        let uri = Url::parse("b2://test-bucket/new").unwrap();
        let err = backend()
            .store_file(Arc::new(Bytes::from_static(b"data")), 4, &uri)
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::AccessDenied);
    }

    // ========================================================================
    // TEST: Factory
    // ========================================================================

    #[tokio::test]
    async fn test_factory_unknown_scheme() {
        let uri = Url::parse("s3://bucket/key").unwrap();
        let result = create_storage_backend(&uri, &Config::default(), None).await;

        match result {
            Err(err) => {
                assert_eq!(err, BackendError::UnsupportedScheme("s3".into()));
                assert_eq!(err.to_string(), "unknown URL scheme s3");
            }
            Ok(_) => panic!("s3:// should not be supported"),
        }
    }

    #[tokio::test]
    async fn test_factory_b2_backend() {
        let uri = Url::parse("b2://test-bucket/prefix/").unwrap();
        assert!(create_storage_backend(&uri, &Config::default(), None)
            .await
            .is_ok());
    }

    // ========================================================================
    // TEST: Dummy backend
    // ========================================================================

    #[tokio::test]
    async fn test_dummy_backend_lists_generated_files() {
        let mut dummy = DummyBackend::new();
        dummy.generate_dummy_files("prefix/", 3);

        let uri = Url::parse("dummy://bucket/prefix/").unwrap();
        let files = dummy.list_files(&uri).await.unwrap();

        let names: Vec<&str> = files.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["prefix/A", "prefix/B", "prefix/C"]);
        assert_eq!(files[1].size(), 1);
        assert_eq!(files[1].modified(), ts(1));
    }

    #[tokio::test]
    async fn test_dummy_backend_error() {
        let mut dummy = DummyBackend::new();
        dummy.set_dummy_error(Some(BackendError::OperationTimeout));
        assert_eq!(dummy.dummy_error(), Some(&BackendError::OperationTimeout));

        let uri = Url::parse("dummy://bucket/file").unwrap();
        assert_eq!(
            dummy.remove_file(&uri).await.unwrap_err().to_string(),
            "operation timeout"
        );

        dummy.set_dummy_error(None);
        assert!(dummy.remove_file(&uri).await.is_ok());
    }
}
