//! Response body that owns the cleanup of the file it serves.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Bytes;
use tokio::fs::File;
use tokio_stream::Stream;
use tokio_util::io::ReaderStream;

use gofer_shared::fetcher::CleanupGuard;

/// Streaming wrapper around a fetched file.
///
/// The guard travels with the stream, so the underlying file is removed
/// exactly once when the body is dropped: after the last byte is sent,
/// when the client disconnects mid-transfer, or if the response is never
/// polled at all.
pub struct ServedFile {
    inner: ReaderStream<File>,
    _guard: CleanupGuard,
}

impl ServedFile {
    pub fn new(file: File, guard: CleanupGuard) -> Self {
        Self {
            inner: ReaderStream::new(file),
            _guard: guard,
        }
    }
}

impl Stream for ServedFile {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
