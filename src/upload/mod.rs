//! Upload module
//!
//! Stores content either with a single PutObject or, above a size threshold,
//! as a multipart upload whose parts are transferred concurrently.
//!
//! # Strategy
//!
//! - `content_length <= single_shot_threshold`: one PutObject
//! - otherwise: CreateMultipartUpload, then parts of `part_size` bytes
//!   uploaded by at most `concurrent_parts` tasks, each retried up to
//!   `max_attempts` times, then CompleteMultipartUpload (or
//!   AbortMultipartUpload if any part failed)

use crate::config::UploadConfig;
use crate::progress::{ContentSource, PartProgress, ProgressReporter, ProgressSection};
use crate::s3::ObjectStoreApi;
use crate::storage::BackendError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub mod multipart;
pub mod put_object;

/// Largest object stored with a single request (256MB)
pub const DEFAULT_SINGLE_SHOT_THRESHOLD: u64 = 256 * 1024 * 1024;

/// Size of each multipart part except the last (256MB)
pub const DEFAULT_PART_SIZE: u64 = 256 * 1024 * 1024;

/// Part uploads in flight per file
pub const DEFAULT_CONCURRENT_PARTS: usize = 4;

/// Attempts per part before the upload is aborted
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Pause between attempts of the same part
pub const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(5);

/// Smallest part the service accepts, except for the last one (5MB)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Most parts a single multipart upload may have
pub const MAX_PARTS: u64 = 10_000;

/// Largest object a single PutObject may carry (5GB)
pub const MAX_SINGLE_PUT_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Upload tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSettings {
    pub single_shot_threshold: u64,
    pub part_size: u64,
    pub concurrent_parts: usize,
    pub max_attempts: u32,
    pub retry_wait: Duration,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            single_shot_threshold: DEFAULT_SINGLE_SHOT_THRESHOLD,
            part_size: DEFAULT_PART_SIZE,
            concurrent_parts: DEFAULT_CONCURRENT_PARTS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_wait: DEFAULT_RETRY_WAIT,
        }
    }
}

impl UploadSettings {
    /// Raise zero part size, concurrency and attempts to one
    pub fn normalized(self) -> Self {
        Self {
            part_size: self.part_size.max(1),
            concurrent_parts: self.concurrent_parts.max(1),
            max_attempts: self.max_attempts.max(1),
            ..self
        }
    }

    /// Part size for `content_length` bytes, grown so the upload fits in
    /// [`MAX_PARTS`] parts
    pub fn part_size_for(&self, content_length: u64) -> u64 {
        self.part_size
            .max(1)
            .max(content_length.div_ceil(MAX_PARTS))
    }
}

impl From<&UploadConfig> for UploadSettings {
    fn from(config: &UploadConfig) -> Self {
        Self {
            single_shot_threshold: config.single_shot_threshold,
            part_size: config.part_size,
            concurrent_parts: config.concurrent_parts,
            max_attempts: config.max_attempts,
            retry_wait: Duration::from_secs(config.retry_wait_seconds),
        }
        .normalized()
    }
}

/// Pause strategy between part attempts
#[async_trait]
pub trait Delay: Send + Sync {
    async fn wait(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay;

#[async_trait]
impl Delay for NoDelay {
    async fn wait(&self, _duration: Duration) {}
}

/// One part of a multipart upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    /// 1-based, contiguous
    pub part_number: i32,
    pub offset: u64,
    pub length: u64,
}

/// Split `[0, content_length)` into consecutive parts of `part_size` bytes;
/// the last part takes the remainder.
pub fn plan_parts(content_length: u64, part_size: u64) -> Vec<PartPlan> {
    let part_size = part_size.max(1);
    let mut parts = Vec::with_capacity(content_length.div_ceil(part_size) as usize);
    let mut offset = 0;
    let mut part_number = 0;

    while offset < content_length {
        let length = part_size.min(content_length - offset);
        part_number += 1;
        parts.push(PartPlan {
            part_number,
            offset,
            length,
        });
        offset += length;
    }

    parts
}

/// Drives single-shot and multipart uploads against an [`ObjectStoreApi`]
#[derive(Clone)]
pub struct UploadEngine {
    api: Arc<dyn ObjectStoreApi>,
    settings: UploadSettings,
    delay: Arc<dyn Delay>,
    progress: Option<Arc<dyn ProgressReporter>>,
}

impl UploadEngine {
    /// Engine sleeping on the tokio timer between retries, without progress reporting
    ///
    /// Zero part size, concurrency or attempts are raised to one.
    pub fn new(api: Arc<dyn ObjectStoreApi>, settings: UploadSettings) -> Self {
        Self {
            api,
            settings: settings.normalized(),
            delay: Arc::new(TokioDelay),
            progress: None,
        }
    }

    /// Replace the pause strategy used between part attempts
    pub fn with_delay(mut self, delay: Arc<dyn Delay>) -> Self {
        self.delay = delay;
        self
    }

    /// Report per-part progress to `reporter`
    pub fn with_progress(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress = Some(reporter);
        self
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    pub fn progress_enabled(&self) -> bool {
        self.progress.is_some()
    }

    /// Store `content_length` bytes of `content` as `bucket/key`
    pub async fn store(
        &self,
        content: Arc<dyn ContentSource>,
        content_length: u64,
        bucket: &str,
        key: &str,
    ) -> Result<(), BackendError> {
        if content_length <= self.settings.single_shot_threshold {
            self.put_single(content, content_length, bucket, key).await
        } else {
            self.put_multipart(content, content_length, bucket, key)
                .await
        }
    }

    /// Section of `content` with its own progress task, when reporting is on
    fn section(&self, content: Arc<dyn ContentSource>, offset: u64, length: u64) -> ProgressSection {
        let progress = self.progress.as_ref().and_then(|reporter| {
            match PartProgress::new(reporter.clone(), length) {
                Ok(progress) => Some(Arc::new(progress)),
                Err(e) => {
                    tracing::debug!(error = %e, "progress reporting disabled for section");
                    None
                }
            }
        });
        ProgressSection::new(content, offset, length, progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_parts_exact_multiple() {
        let parts = plan_parts(30, 10);
        assert_eq!(parts.len(), 3);
        assert_eq!(
            parts[2],
            PartPlan {
                part_number: 3,
                offset: 20,
                length: 10
            }
        );
    }

    #[test]
    fn test_plan_parts_last_part_takes_remainder() {
        let parts = plan_parts(25, 10);
        let lengths: Vec<u64> = parts.iter().map(|p| p.length).collect();
        assert_eq!(lengths, vec![10, 10, 5]);

        let numbers: Vec<i32> = parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_plan_parts_cover_content_contiguously() {
        for (len, size) in [(1, 1), (7, 3), (100, 7), (1024, 1000)] {
            let parts = plan_parts(len, size);
            let mut expected_offset = 0;
            for part in &parts {
                assert_eq!(part.offset, expected_offset);
                assert!(part.length > 0 && part.length <= size);
                expected_offset += part.length;
            }
            assert_eq!(expected_offset, len);
        }
    }

    #[test]
    fn test_plan_parts_empty_content() {
        assert!(plan_parts(0, 10).is_empty());
    }

    #[test]
    fn test_settings_from_config_clamps_zero() {
        let config = UploadConfig {
            single_shot_threshold: 10,
            part_size: 0,
            concurrent_parts: 0,
            max_attempts: 0,
            retry_wait_seconds: 2,
            attempt_timeout_seconds: None,
        };
        let settings = UploadSettings::from(&config);
        assert_eq!(settings.part_size, 1);
        assert_eq!(settings.concurrent_parts, 1);
        assert_eq!(settings.max_attempts, 1);
        assert_eq!(settings.retry_wait, Duration::from_secs(2));
    }

    #[test]
    fn test_engine_normalizes_settings() {
        let api = Arc::new(crate::s3::MockObjectStoreApi::new());
        let settings = UploadSettings {
            single_shot_threshold: 0,
            part_size: 0,
            concurrent_parts: 0,
            max_attempts: 0,
            retry_wait: Duration::ZERO,
        };
        let engine = UploadEngine::new(api, settings);
        assert_eq!(engine.settings().part_size, 1);
        assert_eq!(engine.settings().concurrent_parts, 1);
        assert_eq!(engine.settings().max_attempts, 1);
    }

    #[test]
    fn test_part_size_grows_to_part_limit() {
        let settings = UploadSettings {
            part_size: MIN_PART_SIZE,
            ..UploadSettings::default()
        };
        assert_eq!(settings.part_size_for(1024), MIN_PART_SIZE);
        assert_eq!(settings.part_size_for(MIN_PART_SIZE * MAX_PARTS), MIN_PART_SIZE);

        let large = MIN_PART_SIZE * MAX_PARTS + 1;
        let part_size = settings.part_size_for(large);
        assert!(part_size > MIN_PART_SIZE);
        assert!(large.div_ceil(part_size) <= MAX_PARTS);

        let tiny = UploadSettings {
            part_size: 1,
            ..UploadSettings::default()
        };
        assert_eq!(plan_parts(20_000, tiny.part_size_for(20_000)).len(), MAX_PARTS as usize);
    }

    #[tokio::test]
    async fn test_no_delay_returns_immediately() {
        let started = std::time::Instant::now();
        NoDelay.wait(Duration::from_secs(60)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_delay_sleeps() {
        let started = tokio::time::Instant::now();
        TokioDelay.wait(Duration::from_secs(5)).await;
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
