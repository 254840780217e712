//! Streaming request bodies
//!
//! Adapts a [`ProgressSection`] to the SDK's `ByteStream`. The stream is
//! retryable: each time the SDK needs the body again it gets a fresh reader
//! over the same section, and the section's progress counter keeps counting.

use crate::progress::{ProgressSection, ProgressSectionReader};
use aws_sdk_s3::primitives::ByteStream;
use aws_smithy_types::body::SdkBody;
use bytes::{Bytes, BytesMut};
use http_body::{Body, Frame, SizeHint};
use std::future::Future;
use std::io::{self, Read};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

/// Size of each frame handed to the transport
const CHUNK_SIZE: usize = 64 * 1024;

type ChunkRead = (ProgressSectionReader, io::Result<Bytes>);

/// Read the next chunk of at most `CHUNK_SIZE` bytes
fn read_chunk(reader: &mut ProgressSectionReader) -> io::Result<Bytes> {
    let want = usize::try_from(reader.remaining())
        .unwrap_or(CHUNK_SIZE)
        .min(CHUNK_SIZE);
    let mut buf = BytesMut::zeroed(want);

    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "content ended before the declared length",
                ))
            }
            Ok(n) => {
                buf.truncate(n);
                return Ok(buf.freeze());
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// `http_body::Body` reading a section chunk by chunk
///
/// Reads run on the blocking thread pool when a tokio runtime is available,
/// so a slow filesystem never stalls a worker thread.
pub struct ProgressBody {
    reader: Option<ProgressSectionReader>,
    pending: Option<JoinHandle<ChunkRead>>,
    remaining: u64,
}

impl ProgressBody {
    pub fn new(section: &ProgressSection) -> Self {
        let reader = section.reader();
        Self {
            remaining: reader.remaining(),
            reader: Some(reader),
            pending: None,
        }
    }

    fn frame(&mut self, chunk: io::Result<Bytes>) -> Option<Result<Frame<Bytes>, io::Error>> {
        match chunk {
            Ok(bytes) => {
                self.remaining = self.remaining.saturating_sub(bytes.len() as u64);
                Some(Ok(Frame::data(bytes)))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}

impl Body for ProgressBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        if this.pending.is_none() {
            if this.remaining == 0 {
                return Poll::Ready(None);
            }
            let Some(mut reader) = this.reader.take() else {
                return Poll::Ready(None);
            };

            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    this.pending = Some(handle.spawn_blocking(move || {
                        let chunk = read_chunk(&mut reader);
                        (reader, chunk)
                    }));
                }
                Err(_) => {
                    let chunk = read_chunk(&mut reader);
                    this.reader = Some(reader);
                    return Poll::Ready(this.frame(chunk));
                }
            }
        }

        let Some(pending) = this.pending.as_mut() else {
            return Poll::Ready(None);
        };
        match Pin::new(pending).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(joined) => {
                this.pending = None;
                let chunk = match joined {
                    Ok((reader, chunk)) => {
                        this.reader = Some(reader);
                        chunk
                    }
                    Err(e) => Err(io::Error::other(e)),
                };
                Poll::Ready(this.frame(chunk))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.remaining == 0 && self.pending.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.remaining)
    }
}

/// Wrap a section as a retryable SDK byte stream
pub fn byte_stream(section: ProgressSection) -> ByteStream {
    ByteStream::new(SdkBody::retryable(move || {
        SdkBody::from_body_1_x(ProgressBody::new(&section))
    }))
}
