//! Write an object through [`AsyncWrite`] while a background task stores it.

use crate::pipe::{PipeWriter, pipe};
use crate::{Error, Result, Store};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Streams bytes into [`Store::store`] running on a spawned task.
///
/// Bytes written here travel through a [`pipe`] with one chunk in flight, so
/// the object is never buffered whole. Call [`finish`](ObjectWriter::finish)
/// to end the stream and get the store's result; a write error from this
/// writer usually means the store already gave up, and `finish` tells you why.
///
/// Dropping the writer without finishing cancels the write, so an abandoned
/// upload is never published truncated.
///
/// ```no_run
/// # async fn example() -> dogbox_store::Result<()> {
/// use dogbox_store::{LocalStore, ObjectWriter};
/// use std::sync::Arc;
/// use tokio::io::AsyncWriteExt;
///
/// let store = Arc::new(LocalStore::new("/srv/dogbox"));
/// let mut writer = ObjectWriter::new(store, "Xk3/abc.png");
/// writer.write_all(b"...").await?;
/// writer.finish().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ObjectWriter {
    pipe: Option<PipeWriter>,
    task: Option<JoinHandle<Result<()>>>,
    cancel: CancellationToken,
    path: String,
}

impl ObjectWriter {
    /// Start storing `path` in `store`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<S: Store + 'static>(store: Arc<S>, path: impl Into<String>) -> Self {
        Self::with_cancellation(store, path, CancellationToken::new())
    }

    /// Like [`new`](ObjectWriter::new), aborting the store when `cancel` fires.
    pub fn with_cancellation<S: Store + 'static>(
        store: Arc<S>,
        path: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        let path = path.into();
        let (writer, reader) = pipe();

        let task = {
            let path = path.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { store.store(&path, reader, &cancel).await })
        };

        Self {
            pipe: Some(writer),
            task: Some(task),
            cancel,
            path,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// End the stream and wait for the store to finish.
    pub async fn finish(mut self) -> Result<()> {
        self.pipe = None;
        let result = self.join().await;
        match &result {
            Ok(()) => tracing::debug!(path = %self.path, "Streaming write finished"),
            Err(e) => tracing::warn!(path = %self.path, error = %e, "Streaming write failed"),
        }
        result
    }

    /// Cancel the write and wait for the store to clean up.
    ///
    /// Nothing is published. Returns the store's own result, normally
    /// [`Error::Canceled`].
    pub async fn abort(mut self) -> Result<()> {
        self.cancel.cancel();
        self.pipe = None;
        self.join().await
    }

    async fn join(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        match task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Task(e.to_string())),
        }
    }

    fn pipe_mut(&mut self) -> io::Result<Pin<&mut PipeWriter>> {
        self.pipe
            .as_mut()
            .map(Pin::new)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "writer already finished"))
    }
}

impl AsyncWrite for ObjectWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().pipe_mut() {
            Ok(pipe) => pipe.poll_write(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().pipe_mut() {
            Ok(pipe) => pipe.poll_flush(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    /// Ends the stream. The store's result is still only available from `finish`.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().pipe_mut() {
            Ok(pipe) => pipe.poll_shutdown(cx),
            Err(_) => Poll::Ready(Ok(())),
        }
    }
}

impl Drop for ObjectWriter {
    fn drop(&mut self) {
        if self.task.is_some() {
            // Cancel before the pipe drops, so the store sees cancellation rather than EOF.
            self.cancel.cancel();
            tracing::debug!(path = %self.path, "Unfinished streaming write dropped, canceling");
        }
    }
}
