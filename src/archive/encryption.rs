//! age encryption of prepared archives

use super::{ArchiveError, TEMP_PREFIX};
use age::x25519::Recipient;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Recipients for `pubkey`
///
/// `pubkey` is either a single `age1...` recipient or the path of a file
/// holding one recipient per line (`#` comments and blank lines ignored).
/// An empty value disables encryption and yields no recipients.
pub fn parse_recipients(pubkey: &str) -> Result<Vec<Recipient>, ArchiveError> {
    let pubkey = pubkey.trim();
    if pubkey.is_empty() {
        return Ok(Vec::new());
    }

    if let Ok(recipient) = pubkey.parse::<Recipient>() {
        return Ok(vec![recipient]);
    }

    tracing::debug!(pubkey, "pubkey is not a recipient, reading it as a file path");
    let content = std::fs::read_to_string(pubkey).map_err(|source| ArchiveError::PubkeyFile {
        path: pubkey.to_string(),
        source,
    })?;

    let recipients = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            line.parse::<Recipient>()
                .map_err(|reason| ArchiveError::InvalidRecipient {
                    recipient: line.to_string(),
                    reason: reason.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if recipients.is_empty() {
        return Err(ArchiveError::NoRecipients(pubkey.to_string()));
    }
    Ok(recipients)
}

/// Encrypt `input` for `recipients` into a temporary file
pub fn encrypt_file(input: &Path, recipients: &[Recipient]) -> Result<NamedTempFile, ArchiveError> {
    let encryptor = age::Encryptor::with_recipients(
        recipients.iter().map(|r| r as &dyn age::Recipient),
    )
    .map_err(|e| ArchiveError::Encryption(e.to_string()))?;

    let output = tempfile::Builder::new()
        .prefix(&format!("{}encrypted-", TEMP_PREFIX))
        .tempfile()?;

    let mut source = File::open(input)?;
    let mut writer = encryptor.wrap_output(BufWriter::new(output.as_file().try_clone()?))?;
    let written = io::copy(&mut source, &mut writer)?;
    if written == 0 {
        return Err(ArchiveError::EmptyOutput);
    }
    writer.finish()?.flush()?;

    tracing::info!(
        input = %input.display(),
        recipients = recipients.len(),
        bytes = written,
        "Encrypted backup archive"
    );
    Ok(output)
}
