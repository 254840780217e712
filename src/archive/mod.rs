//! Backup archive preparation
//!
//! Packs a directory into a gzip-compressed tarball and optionally encrypts
//! the result for age recipients. Every output is a temporary file that is
//! removed when its handle is dropped.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

pub mod encryption;

pub use encryption::{encrypt_file, parse_recipients};

/// Prefix of temporary files created while preparing a backup
pub const TEMP_PREFIX: &str = "squirrelup-";

/// Archive and encryption errors
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("{0}: not a directory")]
    NotADirectory(String),

    #[error("failed to generate archive: {0}")]
    Io(#[from] io::Error),

    #[error("could not open pubkey file {path}: {source}")]
    PubkeyFile {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid age recipient '{recipient}': {reason}")]
    InvalidRecipient { recipient: String, reason: String },

    #[error("no recipients found in pubkey file {0}")]
    NoRecipients(String),

    #[error("could not initialize encryption: {0}")]
    Encryption(String),

    #[error("zero bytes written to encrypted archive")]
    EmptyOutput,
}

/// Pack `dir` into a `.tar.gz` temporary file
///
/// Entries are stored relative to `dir`; symlinks are archived as links.
pub fn archive_directory(dir: &Path) -> Result<NamedTempFile, ArchiveError> {
    if !dir.is_dir() {
        return Err(ArchiveError::NotADirectory(dir.display().to_string()));
    }

    let output = tempfile::Builder::new()
        .prefix(&format!("{}backup-", TEMP_PREFIX))
        .suffix(".tar.gz")
        .tempfile()?;

    let encoder = GzEncoder::new(
        BufWriter::new(output.as_file().try_clone()?),
        Compression::default(),
    );
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all("", dir)?;

    let mut writer = builder.into_inner()?.finish()?;
    writer.flush()?;

    tracing::info!(
        dir = %dir.display(),
        archive = %output.path().display(),
        bytes = output.as_file().metadata()?.len(),
        "Created backup archive"
    );
    Ok(output)
}
