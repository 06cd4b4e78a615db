//! Byte-count cap for async readers.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use pin_project_lite::pin_project;
use thiserror::Error;
use tokio::io::{AsyncRead, ReadBuf};

/// Typed signal carried inside the I/O error chain when a [`CappedReader`]
/// rejects excess bytes, so callers can tell a size violation apart from
/// any other read failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("size limit of {limit} bytes exceeded")]
pub struct SizeLimitExceeded {
    pub limit: u64,
}

pin_project! {
    /// Reader adapter that fails once more than `limit` bytes have passed
    /// through it.
    pub struct CappedReader<R> {
        #[pin]
        inner: R,
        limit: u64,
        consumed: u64,
    }
}

impl<R> CappedReader<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            limit,
            consumed: 0,
        }
    }

    /// Bytes read through the cap so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }
}

impl<R: AsyncRead> AsyncRead for CappedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        ready!(this.inner.poll_read(cx, buf))?;
        *this.consumed += (buf.filled().len() - before) as u64;
        if *this.consumed > *this.limit {
            return Poll::Ready(Err(io::Error::other(SizeLimitExceeded {
                limit: *this.limit,
            })));
        }
        Poll::Ready(Ok(()))
    }
}

/// Whether the capping signal appears anywhere in an I/O error chain.
pub fn size_limit_exceeded(err: &io::Error) -> bool {
    let mut cause: Option<&(dyn std::error::Error + 'static)> = err.get_ref().map(|e| e as _);
    while let Some(err) = cause {
        if err.is::<SizeLimitExceeded>() {
            return true;
        }
        cause = err.source();
    }
    false
}
