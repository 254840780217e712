//! In-memory backend for `dummy://` URIs
//!
//! Holds a fixed file list and an optional error that every operation
//! returns. Used to exercise callers without a storage service.

use super::{BackendError, FileInfo, StorageBackend, PATH_SEPARATOR};
use crate::progress::ContentSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use url::Url;

#[derive(Debug, Default, Clone)]
pub struct DummyBackend {
    files: Vec<FileInfo>,
    error: Option<BackendError>,
}

impl DummyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the file list with `count` entries named `path` + `A`, `B`, ...
    ///
    /// Entry `i` has size `i` and was modified `i` seconds after the epoch.
    pub fn generate_dummy_files(&mut self, path: &str, count: u64) {
        self.files = (0..count)
            .map(|index| {
                let suffix = char::from_u32(u32::from('A') + index as u32).unwrap_or('?');
                FileInfo::new(
                    format!("{}{}", path, suffix),
                    index,
                    DateTime::from_timestamp(index as i64, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                    true,
                )
            })
            .collect();
    }

    pub fn dummy_files(&self) -> &[FileInfo] {
        &self.files
    }

    /// Error returned by every subsequent operation
    pub fn set_dummy_error(&mut self, error: Option<BackendError>) {
        self.error = error;
    }

    pub fn dummy_error(&self) -> Option<&BackendError> {
        self.error.as_ref()
    }

    fn check(&self) -> Result<(), BackendError> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StorageBackend for DummyBackend {
    async fn get_file_info(&self, uri: &Url) -> Result<FileInfo, BackendError> {
        self.check()?;

        let name = format!("{}{}", uri.host_str().unwrap_or_default(), uri.path());
        Ok(FileInfo::new(
            name,
            0,
            DateTime::<Utc>::UNIX_EPOCH,
            !uri.path().ends_with(PATH_SEPARATOR),
        ))
    }

    async fn list_files(&self, _uri: &Url) -> Result<Vec<FileInfo>, BackendError> {
        self.check()?;
        Ok(self.files.clone())
    }

    async fn store_file(
        &self,
        _content: Arc<dyn ContentSource>,
        _content_length: u64,
        _uri: &Url,
    ) -> Result<(), BackendError> {
        self.check()
    }

    async fn remove_file(&self, _uri: &Url) -> Result<(), BackendError> {
        self.check()
    }
}
