//! Multipart upload path
//!
//! Uploads content above the single-shot threshold as a multipart session.
//!
//! # Flow
//!
//! 1. CreateMultipartUpload; a missing upload id fails the upload
//! 2. One task per part, each holding a semaphore permit while it runs, so
//!    at most `concurrent_parts` parts are in flight
//! 3. Each task retries its part up to `max_attempts` times and sends one
//!    [`PartOutcome`] through the result channel
//! 4. The channel is drained until every task has exited
//! 5. All parts succeeded: CompleteMultipartUpload with parts sorted by
//!    number. Otherwise: AbortMultipartUpload and return the first error

use super::{plan_parts, Delay, PartPlan, UploadEngine};
use crate::metrics;
use crate::progress::{ContentSource, ProgressSection};
use crate::s3::{CompletedPart, ObjectStoreApi};
use crate::storage::{classify, BackendError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tracing::Instrument;

/// Remote session shared by every part of one upload
#[derive(Debug)]
struct UploadTarget {
    bucket: String,
    key: String,
    upload_id: String,
}

/// Terminal result of one part
#[derive(Debug)]
pub struct PartOutcome {
    pub part_number: i32,
    /// Attempts made, including the last one
    pub attempts: u32,
    pub result: Result<CompletedPart, BackendError>,
}

/// Outcomes collected from the result channel, in arrival order
#[derive(Debug, Default)]
struct Collected {
    completed: Vec<CompletedPart>,
    first_error: Option<BackendError>,
    received: u32,
}

impl Collected {
    fn push(&mut self, outcome: PartOutcome) {
        self.received += 1;
        match outcome.result {
            Ok(part) => self.completed.push(part),
            Err(e) => {
                if self.first_error.is_none() {
                    self.first_error = Some(e);
                }
            }
        }
    }

    /// The error to report, if the upload cannot be completed
    fn failure(&mut self, expected: u32) -> Option<BackendError> {
        if let Some(e) = self.first_error.take() {
            return Some(e);
        }
        if self.received < expected || self.completed.len() < expected as usize {
            return Some(BackendError::MissingPartResults {
                expected,
                received: self.received,
            });
        }
        None
    }
}

/// Put completed parts in the order CompleteMultipartUpload requires
pub fn order_parts(mut parts: Vec<CompletedPart>) -> Vec<CompletedPart> {
    parts.sort_by_key(|part| part.part_number);
    parts
}

/// Upload one part, retrying on failure
async fn upload_part_with_retry(
    api: Arc<dyn ObjectStoreApi>,
    target: Arc<UploadTarget>,
    section: ProgressSection,
    part_number: i32,
    max_attempts: u32,
    retry_wait: Duration,
    delay: Arc<dyn Delay>,
) -> PartOutcome {
    let mut attempts = 0;

    let result = loop {
        attempts += 1;

        match api
            .upload_part(
                &target.bucket,
                &target.key,
                &target.upload_id,
                part_number,
                section.clone(),
            )
            .await
        {
            Ok(etag) => {
                metrics::record_part_attempt(true);
                break Ok(CompletedPart { part_number, etag });
            }
            Err(e) => {
                metrics::record_part_attempt(false);
                if attempts >= max_attempts {
                    tracing::error!(
                        part_number,
                        attempts,
                        error = %e,
                        "Part upload failed, giving up"
                    );
                    break Err(classify(&e));
                }

                tracing::warn!(
                    part_number,
                    attempt = attempts,
                    max_attempts,
                    error = %e,
                    "Part upload failed, retrying"
                );
                delay.wait(retry_wait).await;
            }
        }
    };

    section.finish();

    PartOutcome {
        part_number,
        attempts,
        result,
    }
}

impl UploadEngine {
    #[tracing::instrument(
        name = "upload.multipart",
        skip(self, content),
        fields(
            s3.bucket = %bucket,
            s3.key = %key,
            upload.bytes = content_length,
            s3.upload_id = tracing::field::Empty,
            parts_count = tracing::field::Empty
        ),
        err
    )]
    pub(crate) async fn put_multipart(
        &self,
        content: Arc<dyn ContentSource>,
        content_length: u64,
        bucket: &str,
        key: &str,
    ) -> Result<(), BackendError> {
        let start_time = Instant::now();

        let part_size = self.settings.part_size_for(content_length);
        if part_size != self.settings.part_size {
            tracing::warn!(
                configured = self.settings.part_size,
                part_size,
                "Part size raised to stay within the part limit"
            );
        }
        let plan = plan_parts(content_length, part_size);
        let expected = plan.len() as u32;

        let upload_id = match self.api.create_multipart_upload(bucket, key).await {
            Ok(Some(id)) if !id.is_empty() => id,
            Ok(_) => {
                metrics::record_store_failure("multipart");
                metrics::record_error(&BackendError::MissingUploadId);
                return Err(BackendError::MissingUploadId);
            }
            Err(e) => {
                let err = classify(&e);
                metrics::record_store_failure("multipart");
                metrics::record_error(&err);
                return Err(err);
            }
        };

        let span = tracing::Span::current();
        span.record("s3.upload_id", upload_id.as_str());
        span.record("parts_count", expected);

        tracing::info!(
            upload_id = %upload_id,
            parts = expected,
            part_size,
            concurrency = self.settings.concurrent_parts,
            "Created multipart upload"
        );

        let target = Arc::new(UploadTarget {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id,
        });

        let mut collected = self.run_parts(&target, content, plan).await;

        let result = match collected.failure(expected) {
            Some(err) => {
                self.abort(&target).await;
                Err(err)
            }
            None => {
                let parts = order_parts(std::mem::take(&mut collected.completed));
                self.api
                    .complete_multipart_upload(
                        &target.bucket,
                        &target.key,
                        &target.upload_id,
                        parts,
                    )
                    .await
                    .map_err(|e| classify(&e))
            }
        };

        let duration = start_time.elapsed();
        metrics::record_store_duration("multipart", duration.as_secs_f64());

        match &result {
            Ok(()) => {
                metrics::record_store_success("multipart", content_length);
                metrics::record_multipart_parts(expected);
                tracing::info!(
                    upload_id = %target.upload_id,
                    parts = expected,
                    duration_ms = duration.as_millis(),
                    "Completed multipart upload"
                );
            }
            Err(e) => {
                metrics::record_store_failure("multipart");
                metrics::record_error(e);
                tracing::error!(
                    upload_id = %target.upload_id,
                    error = %e,
                    duration_ms = duration.as_millis(),
                    "Multipart upload failed"
                );
            }
        }

        result
    }

    /// Run every part to completion and collect the outcomes
    async fn run_parts(
        &self,
        target: &Arc<UploadTarget>,
        content: Arc<dyn ContentSource>,
        plan: Vec<PartPlan>,
    ) -> Collected {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrent_parts));
        let (tx, mut rx) = mpsc::unbounded_channel::<PartOutcome>();

        for part in plan {
            let api = self.api.clone();
            let delay = self.delay.clone();
            let target = target.clone();
            let semaphore = semaphore.clone();
            let tx = tx.clone();
            let section = self.section(content.clone(), part.offset, part.length);
            let max_attempts = self.settings.max_attempts;
            let retry_wait = self.settings.retry_wait;

            let span = tracing::info_span!(
                "upload.multipart.part",
                s3.part_number = part.part_number,
                upload.bytes = part.length
            );

            tokio::spawn(
                async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return;
                    };
                    let outcome = upload_part_with_retry(
                        api,
                        target,
                        section,
                        part.part_number,
                        max_attempts,
                        retry_wait,
                        delay,
                    )
                    .await;
                    tracing::debug!(
                        part_number = outcome.part_number,
                        attempts = outcome.attempts,
                        ok = outcome.result.is_ok(),
                        "Part finished"
                    );
                    let _ = tx.send(outcome);
                }
                .instrument(span),
            );
        }
        drop(tx);

        let mut collected = Collected::default();
        while let Some(outcome) = rx.recv().await {
            collected.push(outcome);
        }
        collected
    }

    /// Best-effort AbortMultipartUpload; failures are logged, not returned
    async fn abort(&self, target: &UploadTarget) {
        match self
            .api
            .abort_multipart_upload(&target.bucket, &target.key, &target.upload_id)
            .await
        {
            Ok(()) => {
                tracing::info!(upload_id = %target.upload_id, "Aborted multipart upload");
            }
            Err(e) => {
                // The session stays open server-side until a lifecycle rule removes it.
                metrics::record_abort_failure();
                tracing::error!(
                    upload_id = %target.upload_id,
                    s3.bucket = %target.bucket,
                    s3.key = %target.key,
                    error = %e,
                    "Failed to abort multipart upload; incomplete session left behind"
                );
            }
        }
    }
}
