//! Storage backend module
//!
//! Maps logical file operations (stat, list, store, delete) onto a storage
//! service addressed by URI.
//!
//! # Addressing
//!
//! - `b2://<bucket>/<key>` addresses a single object
//! - `b2://<bucket>/<prefix>/` (trailing `/`) addresses every object whose
//!   key starts with the prefix; directories are only a naming convention
//! - `dummy://...` selects the in-memory [`DummyBackend`]

use crate::config::Config;
use crate::progress::{ContentSource, ProgressReporter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::sync::Arc;
use url::Url;

pub mod b2;
pub mod dummy;
pub mod error;

pub use b2::B2Backend;
pub use dummy::DummyBackend;
pub use error::{classify, BackendError};

/// Separator that turns a key into a prefix
pub const PATH_SEPARATOR: char = '/';

/// Characters escaped when a key is written into a URI path; `/` is kept
const KEY_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Information about a stored object or a prefix
///
/// For a prefix, `size` is the sum of the contained objects and `modified`
/// the most recent modification among them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    name: String,
    size: u64,
    modified: DateTime<Utc>,
    is_file: bool,
}

impl FileInfo {
    pub fn new(name: impl Into<String>, size: u64, modified: DateTime<Utc>, is_file: bool) -> Self {
        Self {
            name: name.into(),
            size,
            modified,
            is_file,
        }
    }

    /// Object key or prefix
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    /// True for an object, false for a prefix
    pub fn is_file(&self) -> bool {
        self.is_file
    }
}

/// Bucket and key extracted from a destination URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectAddress {
    pub bucket: String,
    pub key: String,
}

impl ObjectAddress {
    /// Parse `scheme://bucket/key`; the leading `/` of the path is dropped
    /// and percent-encoding is decoded.
    pub fn parse(uri: &Url) -> Result<Self, BackendError> {
        let bucket = uri
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| BackendError::InvalidUri(format!("{}: missing bucket", uri)))?;

        let path = uri
            .path()
            .strip_prefix(PATH_SEPARATOR)
            .unwrap_or(uri.path());
        let key = percent_decode_str(path)
            .decode_utf8()
            .map_err(|e| BackendError::InvalidUri(format!("{}: {}", uri, e)))?;

        Ok(Self {
            bucket: bucket.to_string(),
            key: key.into_owned(),
        })
    }

    /// A key ending in the separator (or the bucket root) is a prefix
    pub fn is_prefix(&self) -> bool {
        self.key.is_empty() || self.key.ends_with(PATH_SEPARATOR)
    }
}

/// Build the URI of `key` in the same bucket as `base`
///
/// The key is percent-encoded, so [`ObjectAddress::parse`] returns it unchanged.
pub fn object_uri(base: &Url, key: &str) -> Url {
    let mut uri = base.clone();
    let encoded = utf8_percent_encode(key, KEY_ENCODE_SET);
    uri.set_path(&format!("{}{}", PATH_SEPARATOR, encoded));
    uri.set_query(None);
    uri.set_fragment(None);
    uri
}

/// Generic interface to storage backends
///
/// Instances may be shared by several concurrent transfers.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Information about an object, or aggregated over a prefix
    async fn get_file_info(&self, uri: &Url) -> Result<FileInfo, BackendError>;

    /// Every object under a prefix, in the order the service lists them
    async fn list_files(&self, uri: &Url) -> Result<Vec<FileInfo>, BackendError>;

    /// Store `content_length` bytes of `content` at `uri`
    ///
    /// Either the whole object is stored or nothing is.
    async fn store_file(
        &self,
        content: Arc<dyn ContentSource>,
        content_length: u64,
        uri: &Url,
    ) -> Result<(), BackendError>;

    /// Remove the object at `uri`
    async fn remove_file(&self, uri: &Url) -> Result<(), BackendError>;
}

/// Create a backend for the scheme of `uri`
///
/// `progress` enables per-part progress reporting on backends that support it.
pub async fn create_storage_backend(
    uri: &Url,
    config: &Config,
    progress: Option<Arc<dyn ProgressReporter>>,
) -> Result<Box<dyn StorageBackend>, BackendError> {
    match uri.scheme() {
        "dummy" => Ok(Box::new(DummyBackend::new())),
        "b2" => {
            let mut backend = B2Backend::from_config(config).await;
            if let Some(reporter) = progress {
                backend = backend.with_progress(reporter);
            }
            Ok(Box::new(backend))
        }
        other => Err(BackendError::UnsupportedScheme(other.to_string())),
    }
}
