//! SquirrelUp Library
//!
//! Storage backends for off-site backups, with a concurrent multipart
//! uploader for Backblaze B2's S3-compatible API.
//!
//! # Features
//!
//! - **URI addressed**: `b2://bucket/key` for objects, `b2://bucket/prefix/` for prefixes
//! - **Concurrent multipart**: large files are split into parts uploaded in parallel,
//!   each retried independently; failed sessions are aborted
//! - **Progress reporting**: per-part signing/uploading phases through a pluggable reporter
//! - **Error taxonomy**: service errors are classified into a small stable set
//! - **Archives**: directories are packed into `.tar.gz`, optionally age-encrypted
//!
//! # Example
//!
//! ```no_run
//! use squirrelup::{config::Config, storage::create_storage_backend};
//! use std::sync::Arc;
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("squirrelup.yaml")?;
//!     let uri = Url::parse("b2://backups/host/2024-01-01.tar.gz")?;
//!     let backend = create_storage_backend(&uri, &config, None).await?;
//!
//!     let file = std::fs::File::open("/tmp/backup.tar.gz")?;
//!     let len = file.metadata()?.len();
//!     backend.store_file(Arc::new(file), len, &uri).await?;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod progress;
pub mod s3;
pub mod storage;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use storage::{create_storage_backend, BackendError, FileInfo, StorageBackend};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
