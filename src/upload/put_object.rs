//! PutObject path
//!
//! Stores content at or below the single-shot threshold with one request.

use super::UploadEngine;
use crate::metrics;
use crate::progress::ContentSource;
use crate::storage::{classify, BackendError};
use std::sync::Arc;
use std::time::Instant;

impl UploadEngine {
    #[tracing::instrument(
        name = "upload.put_object",
        skip(self, content),
        fields(s3.bucket = %bucket, s3.key = %key, upload.bytes = content_length),
        err
    )]
    pub(crate) async fn put_single(
        &self,
        content: Arc<dyn ContentSource>,
        content_length: u64,
        bucket: &str,
        key: &str,
    ) -> Result<(), BackendError> {
        let start_time = Instant::now();
        let section = self.section(content, 0, content_length);

        let result = self
            .api
            .put_object(bucket, key, section.clone())
            .await
            .map_err(|e| classify(&e));
        section.finish();

        let duration = start_time.elapsed();
        metrics::record_store_duration("put_object", duration.as_secs_f64());

        match result {
            Ok(()) => {
                metrics::record_store_success("put_object", content_length);
                tracing::info!(
                    bytes = content_length,
                    duration_ms = duration.as_millis(),
                    "PutObject upload completed"
                );
                Ok(())
            }
            Err(e) => {
                metrics::record_store_failure("put_object");
                metrics::record_error(&e);
                tracing::error!(
                    error = %e,
                    duration_ms = duration.as_millis(),
                    "PutObject upload failed"
                );
                Err(e)
            }
        }
    }
}
