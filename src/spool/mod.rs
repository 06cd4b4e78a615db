//! Spool pipe
//!
//! Lands an arbitrary incoming byte stream on local disk while re-exposing
//! it as a seekable, re-readable stream, without ever holding the whole
//! payload in memory.
//!
//! [`spool`] creates a temporary file, removes its directory entry right
//! away and starts one background task that copies the source into the file.
//! The returned [`SpooledStream`] reads through a second descriptor on the
//! same file and may run ahead of the copy: a read that catches up with the
//! writer waits for a progress signal instead of reporting a premature end
//! of stream. End of stream is only reported once the copy has completed and
//! the reader has consumed exactly the recorded byte count.
//!
//! Because the file has no name, nothing is left behind if the process dies
//! mid-upload; the OS reclaims the space once both descriptors close.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncWriteExt, ReadBuf};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Error recorded by the background copy task.
///
/// Cheap to clone; every consumer of the spool sees the same originating
/// I/O error.
#[derive(Debug, Clone, Error)]
#[error("spool copy failed: {0}")]
pub struct CopyFailed(#[source] Arc<io::Error>);

impl CopyFailed {
    /// The I/O error that stopped the copy.
    pub fn source_error(&self) -> &io::Error {
        &self.0
    }

    /// Rebuild an `io::Error` carrying this failure, for read paths.
    pub fn into_io(self) -> io::Error {
        io::Error::new(self.0.kind(), self)
    }
}

#[derive(Default)]
struct Progress {
    written: u64,
    total: Option<u64>,
    error: Option<CopyFailed>,
}

struct Shared {
    progress: Mutex<Progress>,
    changed: Notify,
}

/// Out-of-band view of a spool copy: byte counters and the error slot,
/// usable after the [`SpooledStream`] itself has been handed to a consumer.
#[derive(Clone)]
pub struct SpoolHandle {
    shared: Arc<Shared>,
}

impl SpoolHandle {
    /// Bytes the copy task has written so far.
    pub fn bytes_written(&self) -> u64 {
        self.shared.progress.lock().written
    }

    /// Final byte count, available once the copy has completed cleanly.
    pub fn total_bytes(&self) -> Option<u64> {
        self.shared.progress.lock().total
    }

    /// Error recorded by the copy task, if it failed.
    pub fn error(&self) -> Option<CopyFailed> {
        self.shared.progress.lock().error.clone()
    }

    /// Wait for the copy to finish; resolves to the total byte count.
    pub async fn finished(&self) -> Result<u64, CopyFailed> {
        loop {
            // Created before the check so a completion signal racing this
            // call cannot be missed.
            let notified = self.shared.changed.notified();
            {
                let progress = self.shared.progress.lock();
                if let Some(err) = &progress.error {
                    return Err(err.clone());
                }
                if let Some(total) = progress.total {
                    return Ok(total);
                }
            }
            notified.await;
        }
    }
}

/// Seekable, re-readable stream over the spool file.
///
/// Single-owner: created by [`spool`], consumed by the storage backend.
/// Dropping it aborts a still-running background copy.
pub struct SpooledStream {
    file: File,
    pos: u64,
    shared: Arc<Shared>,
    wait: Option<Pin<Box<dyn Future<Output = ()> + Send + Sync>>>,
    copy_task: JoinHandle<()>,
}

impl SpooledStream {
    /// A handle onto the copy's progress and error slot.
    pub fn handle(&self) -> SpoolHandle {
        SpoolHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Current read position.
    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl Drop for SpooledStream {
    fn drop(&mut self) {
        self.copy_task.abort();
    }
}

/// Start spooling `source` to disk and return the read side.
pub async fn spool<R>(source: R) -> io::Result<SpooledStream>
where
    R: AsyncRead + Send + 'static,
{
    let tmp = tempfile::NamedTempFile::new()?;
    let reader = tmp.reopen()?;
    let (writer, path) = tmp.into_parts();
    debug!(path = %path.display(), "spool file created");
    // Remove the directory entry right away. The data stays reachable
    // through the two open descriptors and the OS reclaims it once they
    // close, so a crash mid-upload cannot orphan a file.
    drop(path);

    let shared = Arc::new(Shared {
        progress: Mutex::new(Progress::default()),
        changed: Notify::new(),
    });
    let copy_task = tokio::spawn(copy_to_disk(
        source,
        File::from_std(writer),
        Arc::clone(&shared),
    ));

    Ok(SpooledStream {
        file: File::from_std(reader),
        pos: 0,
        shared,
        wait: None,
        copy_task,
    })
}

async fn copy_to_disk<R>(source: R, mut sink: File, shared: Arc<Shared>)
where
    R: AsyncRead,
{
    let mut source = std::pin::pin!(source);
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut written = 0u64;
    let result = loop {
        match source.read(&mut buf).await {
            // Flush before the total is published: a reader that observes
            // the total must be able to trust the file contents.
            Ok(0) => break sink.flush().await.map(|()| written),
            Ok(n) => {
                if let Err(err) = sink.write_all(&buf[..n]).await {
                    break Err(err);
                }
                written += n as u64;
                shared.progress.lock().written = written;
                shared.changed.notify_waiters();
            }
            Err(err) => break Err(err),
        }
    };
    {
        let mut progress = shared.progress.lock();
        match result {
            Ok(total) => progress.total = Some(total),
            Err(err) => {
                debug!(error = %err, bytes = written, "spool copy failed");
                progress.error = Some(CopyFailed(Arc::new(err)));
            }
        }
    }
    shared.changed.notify_waiters();
}

impl AsyncRead for SpooledStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        loop {
            if let Some(wait) = this.wait.as_mut() {
                ready!(wait.as_mut().poll(cx));
                this.wait = None;
            }
            if let Some(err) = this.shared.progress.lock().error.clone() {
                return Poll::Ready(Err(err.into_io()));
            }
            let before = buf.filled().len();
            ready!(Pin::new(&mut this.file).poll_read(cx, buf))?;
            let n = buf.filled().len() - before;
            if n > 0 {
                this.pos += n as u64;
                return Poll::Ready(Ok(()));
            }
            // Caught the spool file's current end. Only a completed copy
            // whose recorded total has been consumed is a real end of
            // stream; otherwise wait for the writer.
            let observed = {
                let progress = this.shared.progress.lock();
                if let Some(total) = progress.total {
                    if this.pos >= total {
                        return Poll::Ready(Ok(()));
                    }
                }
                (
                    progress.written,
                    progress.total.is_some(),
                    progress.error.is_some(),
                )
            };
            let shared = Arc::clone(&this.shared);
            let mut wait: Pin<Box<dyn Future<Output = ()> + Send + Sync>> =
                Box::pin(async move { shared.changed.notified().await });
            if wait.as_mut().poll(cx).is_ready() {
                continue;
            }
            // Registered with the notifier; re-check for progress that
            // landed before the registration.
            let advanced = {
                let progress = this.shared.progress.lock();
                progress.written > observed.0
                    || progress.total.is_some() != observed.1
                    || progress.error.is_some() != observed.2
            };
            if advanced {
                continue;
            }
            this.wait = Some(wait);
            return Poll::Pending;
        }
    }
}

impl AsyncSeek for SpooledStream {
    fn start_seek(self: Pin<&mut Self>, position: io::SeekFrom) -> io::Result<()> {
        let this = self.get_mut();
        this.wait = None;
        Pin::new(&mut this.file).start_seek(position)
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        let this = self.get_mut();
        let pos = ready!(Pin::new(&mut this.file).poll_complete(cx))?;
        this.pos = pos;
        Poll::Ready(Ok(pos))
    }
}
