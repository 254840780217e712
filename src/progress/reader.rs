//! Progress-tracking section reader
//!
//! A [`ProgressSection`] describes a byte range of a [`ContentSource`].
//! Every call to [`ProgressSection::reader`] yields a fresh
//! [`ProgressSectionReader`] positioned at the start of the range, so the
//! transport can read the same range several times (once to sign the
//! request, once to send it, again on retry).
//!
//! Progress is counted cumulatively across all readers of one section. The
//! task description is "signing" until the cumulative count first reaches
//! the section size and "uploading" after that.

use super::{ProgressReporter, TaskId};
use bytes::Bytes;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const SIGNING: &str = "signing";
const UPLOADING: &str = "uploading";

/// Random-access byte source
///
/// Reads never move a shared cursor, so one source can back many
/// concurrently read sections.
pub trait ContentSource: Send + Sync {
    /// Read up to `buf.len()` bytes starting at `offset`; `Ok(0)` at end of content
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
}

fn read_slice_at(data: &[u8], buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let Ok(start) = usize::try_from(offset) else {
        return Ok(0);
    };
    if start >= data.len() {
        return Ok(0);
    }
    let n = buf.len().min(data.len() - start);
    buf[..n].copy_from_slice(&data[start..start + n]);
    Ok(n)
}

impl ContentSource for Bytes {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        read_slice_at(self, buf, offset)
    }
}

impl ContentSource for Vec<u8> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        read_slice_at(self, buf, offset)
    }
}

#[cfg(unix)]
impl ContentSource for std::fs::File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }
}

#[cfg(windows)]
impl ContentSource for std::fs::File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }
}

/// Cumulative read counter for one section, bound to one reporter task
pub struct PartProgress {
    reporter: Arc<dyn ProgressReporter>,
    task: TaskId,
    size: u64,
    read: AtomicU64,
}

impl PartProgress {
    /// Create a reporter task for a section of `size` bytes
    pub fn new(
        reporter: Arc<dyn ProgressReporter>,
        size: u64,
    ) -> Result<Self, super::ProgressError> {
        let task = reporter.create_file_task(Some(size))?;
        Ok(Self {
            reporter,
            task,
            size,
            read: AtomicU64::new(0),
        })
    }

    /// Total bytes read so far, across every pass over the section
    pub fn bytes_read(&self) -> u64 {
        self.read.load(Ordering::SeqCst)
    }

    fn record(&self, n: u64) {
        if n == 0 {
            return;
        }

        let before = self.read.fetch_add(n, Ordering::SeqCst);
        let after = before + n;

        // Reporter failures never affect the transfer itself.
        if before == 0 {
            let _ = self.reporter.describe_task(self.task, SIGNING);
        }
        let _ = self.reporter.advance_task(self.task, n);
        if before < self.size && after >= self.size {
            let _ = self.reporter.describe_task(self.task, UPLOADING);
        }
    }

    fn finish(&self) {
        let _ = self.reporter.finish_task(self.task);
    }
}

/// A byte range of a content source, optionally reporting progress
#[derive(Clone)]
pub struct ProgressSection {
    source: Arc<dyn ContentSource>,
    offset: u64,
    len: u64,
    progress: Option<Arc<PartProgress>>,
}

impl ProgressSection {
    pub fn new(
        source: Arc<dyn ContentSource>,
        offset: u64,
        len: u64,
        progress: Option<Arc<PartProgress>>,
    ) -> Self {
        Self {
            source,
            offset,
            len,
            progress,
        }
    }

    /// Offset of the section within its source
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Length of the section in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Progress counter shared by every reader of this section
    pub fn progress(&self) -> Option<&Arc<PartProgress>> {
        self.progress.as_ref()
    }

    /// A new reader positioned at the start of the section
    pub fn reader(&self) -> ProgressSectionReader {
        ProgressSectionReader {
            section: self.clone(),
            pos: 0,
        }
    }

    /// Close the progress task of this section, if any
    pub fn finish(&self) {
        if let Some(progress) = &self.progress {
            progress.finish();
        }
    }
}

impl std::fmt::Debug for ProgressSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSection")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Reader over a [`ProgressSection`]
///
/// Reads and seeks are relative to the section, never past its end.
pub struct ProgressSectionReader {
    section: ProgressSection,
    pos: u64,
}

impl ProgressSectionReader {
    /// Bytes left between the current position and the end of the section
    pub fn remaining(&self) -> u64 {
        self.section.len.saturating_sub(self.pos)
    }
}

impl Read for ProgressSectionReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.remaining();
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let max = usize::try_from(remaining).unwrap_or(usize::MAX).min(buf.len());
        let n = self
            .section
            .source
            .read_at(&mut buf[..max], self.section.offset + self.pos)?;
        self.pos += n as u64;

        if let Some(progress) = &self.section.progress {
            progress.record(n as u64);
        }

        Ok(n)
    }
}

impl Seek for ProgressSectionReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.section.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };

        match target {
            Some(target) => {
                self.pos = target;
                Ok(target)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )),
        }
    }
}
