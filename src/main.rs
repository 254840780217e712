//! SquirrelUp - off-site backup uploader
//!
//! Rotates old backups under a remote prefix, packs the backup directory
//! into an (optionally age-encrypted) `.tar.gz`, and uploads it next to them.

use age::x25519::Recipient;
use anyhow::Context;
use chrono::{DateTime, Local, Utc};
use clap::Parser;
use squirrelup::archive::{archive_directory, encrypt_file, parse_recipients};
use squirrelup::config::Config;
use squirrelup::logging::init_subscriber;
use squirrelup::progress::{BarProgressReporter, LogProgressReporter, ProgressReporter};
use squirrelup::storage::{create_storage_backend, object_uri, ObjectAddress, StorageBackend};
use std::fmt::Write as _;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{error, info, warn};
use url::Url;

/// SquirrelUp - upload an archive to B2 and rotate old backups
#[derive(Parser, Debug)]
#[command(name = "squirrelup")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backup root directory, or an already prepared archive file
    source: PathBuf,

    /// Remote prefix, e.g. b2://bucket/path/to/prefix/
    output_prefix_uri: String,

    /// Path to configuration file
    #[arg(short, long, default_value = "squirrelup.yaml")]
    config: PathBuf,

    /// Log filter (trace, debug, info, warn, error); overrides logging.level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Report per-part upload progress (bars on a terminal, log events otherwise)
    #[arg(short, long)]
    progress: bool,

    /// Write Prometheus metrics to this file on exit
    #[arg(long)]
    metrics_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("could not load configuration from {}", args.config.display()))?;
    if let Some(level) = args.log_level.clone() {
        config.logging.level = level;
    }
    init_subscriber(&config.logging)?;

    info!("Starting SquirrelUp v{}", squirrelup::VERSION);

    let result = run(&args, &config).await;

    if let Some(path) = &args.metrics_file {
        match squirrelup::metrics::gather_text() {
            Ok(text) => {
                if let Err(e) = std::fs::write(path, text) {
                    warn!(path = %path.display(), error = %e, "Could not write metrics file");
                }
            }
            Err(e) => warn!(error = %e, "Could not encode metrics"),
        }
    }

    if let Err(ref e) = result {
        error!(error = %e, "Backup failed");
    }
    result
}

async fn run(args: &Args, config: &Config) -> anyhow::Result<()> {
    let metadata = std::fs::metadata(&args.source)
        .with_context(|| format!("stat call failed on {}", args.source.display()))?;
    if !metadata.is_dir() && !metadata.is_file() {
        anyhow::bail!(
            "first argument must be a directory or a regular file: {}",
            args.source.display()
        );
    }

    let prefix_uri = Url::parse(&args.output_prefix_uri)
        .with_context(|| format!("could not parse output URI {}", args.output_prefix_uri))?;

    let reporter: Option<Arc<dyn ProgressReporter>> = if !args.progress {
        None
    } else if std::io::stderr().is_terminal() {
        Some(Arc::new(BarProgressReporter::new()))
    } else {
        Some(Arc::new(LogProgressReporter::new()))
    };
    let backend = create_storage_backend(&prefix_uri, config, reporter)
        .await
        .context("failed to create backend")?;

    let removed = rotate_backups(backend.as_ref(), &prefix_uri, config.backup.hours, Utc::now())
        .await
        .context("could not list remote files")?;
    info!(removed = removed.len(), "Rotation finished");

    let recipients =
        parse_recipients(&config.encryption.pubkey).context("could not initialize encryption")?;
    if recipients.is_empty() {
        info!("No pubkey configured, encryption disabled");
    }

    let source = args.source.clone();
    let prepared = tokio::task::spawn_blocking(move || prepare_upload(&source, &recipients))
        .await
        .context("archive task failed")??;

    let target = backup_uri(&prefix_uri, &config.backup.name, Local::now())?;

    let file = std::fs::File::open(prepared.path())
        .with_context(|| format!("could not open {}", prepared.path().display()))?;
    let len = file.metadata()?.len();
    backend
        .store_file(Arc::new(file), len, &target)
        .await
        .with_context(|| format!("unable to write {} to {}", args.source.display(), target))?;

    info!(source = %args.source.display(), uri = %target, bytes = len, "Backup stored");
    Ok(())
}

/// File to upload plus the temporary files backing it
///
/// Temporaries are deleted when this value is dropped.
struct PreparedUpload {
    path: PathBuf,
    _temporary: Vec<NamedTempFile>,
}

impl PreparedUpload {
    fn path(&self) -> &Path {
        &self.path
    }
}

/// Archive `source` when it is a directory, then encrypt for `recipients`, if any
fn prepare_upload(source: &Path, recipients: &[Recipient]) -> anyhow::Result<PreparedUpload> {
    let mut temporary = Vec::new();
    let mut path = source.to_path_buf();

    if source.is_dir() {
        let archive = archive_directory(source)?;
        path = archive.path().to_path_buf();
        temporary.push(archive);
    }

    if !recipients.is_empty() {
        let encrypted = encrypt_file(&path, recipients)?;
        path = encrypted.path().to_path_buf();
        temporary.push(encrypted);
    }

    Ok(PreparedUpload {
        path,
        _temporary: temporary,
    })
}

/// Remove every file under `prefix_uri` that is at least `max_age_hours` old
///
/// Listing failures abort; individual removal failures are logged and
/// skipped. Returns the names that were removed.
async fn rotate_backups(
    backend: &dyn StorageBackend,
    prefix_uri: &Url,
    max_age_hours: f64,
    now: DateTime<Utc>,
) -> Result<Vec<String>, squirrelup::BackendError> {
    let files = backend.list_files(prefix_uri).await?;
    let mut removed = Vec::new();

    if max_age_hours <= 0.0 {
        return Ok(removed);
    }

    for file in files {
        let age_hours = (now - file.modified()).num_seconds() as f64 / 3600.0;
        tracing::debug!(file = file.name(), age_hours, "Checking backup age");
        if age_hours < max_age_hours {
            continue;
        }

        let uri = object_uri(prefix_uri, file.name());
        info!(uri = %uri, "Removing old backup");
        match backend.remove_file(&uri).await {
            Ok(()) => removed.push(file.name().to_string()),
            Err(e) => warn!(uri = %uri, error = %e, "Could not remove old backup"),
        }
    }

    Ok(removed)
}

/// `<prefix><now formatted with name_format>.tar.gz`
fn backup_uri<Tz>(prefix_uri: &Url, name_format: &str, now: DateTime<Tz>) -> anyhow::Result<Url>
where
    Tz: chrono::TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let prefix = ObjectAddress::parse(prefix_uri)?;
    let mut name = String::new();
    write!(name, "{}", now.format(name_format))
        .map_err(|_| anyhow::anyhow!("invalid backup name format '{}'", name_format))?;

    Ok(object_uri(prefix_uri, &format!("{}{}.tar.gz", prefix.key, name)))
}
