use crate::copy::COPY_CHUNK_SIZE;
use crate::pipe::{PipeWriter, pipe};
use crate::{Error, MirrorFailureDetails, Result, Store};
use bytes::BytesMut;
use futures::future::join_all;
use std::fmt::Debug;
use std::future::Future;
use std::io;
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing;

/// Replicates objects across multiple backends.
///
/// Writes stream the input once and fan it out to every backend
/// concurrently; the write succeeds only if every backend succeeds. When any
/// backend (or the input) fails, backends that did succeed are rolled back
/// with a delete. Rollback is best-effort: if a compensating delete fails the
/// result is [`Error::RollbackFailure`] instead of [`Error::MirrorFailure`].
///
/// Reads try backends in order and return the first hit.
///
/// Throughput is bounded by the slowest backend, and a stalled backend
/// stalls the whole write; there is no per-backend timeout.
#[derive(Debug)]
pub struct Mirror<S: Store> {
    backends: Vec<S>,
    base_url: Option<String>,
}

impl<S: Store> Mirror<S> {
    /// Create a builder for configuring a mirror.
    pub fn builder() -> MirrorBuilder<S> {
        MirrorBuilder::new()
    }

    /// Create a mirror over `backends`, in read-priority order.
    ///
    /// # Panics
    ///
    /// Panics if `backends` is empty.
    pub fn new(backends: Vec<S>) -> Self {
        assert!(!backends.is_empty(), "Mirror requires at least one backend");
        Self {
            backends,
            base_url: None,
        }
    }

    /// Get the number of backends.
    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// Get a reference to a specific backend by index.
    pub fn backend(&self, index: usize) -> Option<&S> {
        self.backends.get(index)
    }

    pub fn backends(&self) -> &[S] {
        &self.backends
    }

    /// Delete `path` from each backend in `successful_indices`.
    /// Returns the errors encountered during rollback.
    async fn rollback_writes(
        &self,
        path: &str,
        successful_indices: &[usize],
    ) -> Vec<(usize, Box<Error>)> {
        let mut rollback_errors = Vec::new();

        for &idx in successful_indices {
            if let Some(backend) = self.backends.get(idx) {
                if let Err(e) = backend.delete(path).await {
                    tracing::error!(path, backend_index = idx, error = %e, "Rollback delete failed");
                    rollback_errors.push((idx, Box::new(e)));
                }
            }
        }

        rollback_errors
    }

    /// Run `op` against backends in order and return the first success.
    ///
    /// Fails with [`Error::NotFound`] if every backend reported NotFound, and
    /// with [`Error::MirrorFailure`] if any backend failed some other way.
    async fn first_success<'a, T, Fut>(
        &'a self,
        path: &str,
        op: impl Fn(&'a S) -> Fut,
    ) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let mut details = MirrorFailureDetails::default();

        for (idx, backend) in self.backends.iter().enumerate() {
            match op(backend).await {
                Ok(value) => {
                    if idx > 0 {
                        tracing::debug!(path, backend_index = idx, "Served by fallback backend");
                    }
                    return Ok(value);
                }
                Err(Error::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(path, backend_index = idx, error = %e, "Backend read failed, trying next");
                    details.failures.push((idx, Box::new(e)));
                }
            }
        }

        if details.has_failures() {
            Err(Error::MirrorFailure(details))
        } else {
            Err(Error::NotFound(path.to_string()))
        }
    }
}

/// Copy `input` into every lane, chunk by chunk, in source order.
///
/// A lane whose reader has gone away is dropped and the rest keep going.
/// A read error or cancellation is delivered to every remaining lane as an
/// error, never as end-of-stream, so no backend commits a truncated object.
async fn fan_out<R: AsyncRead + Unpin>(
    mut input: R,
    lanes: Vec<PipeWriter>,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut lanes: Vec<Option<PipeWriter>> = lanes.into_iter().map(Some).collect();
    let mut buf = BytesMut::with_capacity(COPY_CHUNK_SIZE);
    let mut copied: u64 = 0;

    loop {
        if lanes.iter().all(Option::is_none) {
            tracing::debug!(copied, "No backend is reading any more, stopping fan-out");
            return Ok(copied);
        }

        buf.reserve(COPY_CHUNK_SIZE);
        let read = if cancel.is_cancelled() {
            Err(Error::Canceled { copied })
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Canceled { copied }),
                read = input.read_buf(&mut buf) => read.map_err(Error::from),
            }
        };

        let n = match read {
            Ok(n) => n,
            Err(e) => {
                abort_lanes(&mut lanes, &e).await;
                return Err(e);
            }
        };

        if n == 0 {
            // Dropping the lanes is end-of-stream for every backend.
            return Ok(copied);
        }
        copied += n as u64;

        let chunk = buf.split().freeze();
        let sends = lanes.iter_mut().enumerate().map(|(idx, lane)| {
            let chunk = chunk.clone();
            async move {
                let failed = match lane.as_mut() {
                    Some(writer) => writer.send(chunk).await.is_err(),
                    None => false,
                };
                if failed {
                    tracing::debug!(backend_index = idx, "Backend stopped reading");
                    *lane = None;
                }
            }
        });
        join_all(sends).await;
    }
}

async fn abort_lanes(lanes: &mut [Option<PipeWriter>], cause: &Error) {
    let kind = match cause {
        Error::Io(e) => e.kind(),
        Error::Canceled { .. } => io::ErrorKind::Interrupted,
        _ => io::ErrorKind::Other,
    };
    let message = cause.to_string();
    let aborts = lanes.iter_mut().flatten().map(|writer| {
        let err = io::Error::new(kind, message.clone());
        async move { writer.abort(err).await }
    });
    join_all(aborts).await;
}

impl<S: Store> Store for Mirror<S> {
    type Reader = S::Reader;

    fn base_url(&self) -> &str {
        match &self.base_url {
            Some(url) => url.as_str(),
            None => self.backends[0].base_url(),
        }
    }

    async fn store<R: AsyncRead + Send + Unpin>(
        &self,
        path: &str,
        input: R,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let lane_cancel = cancel.child_token();
        let (writers, readers): (Vec<_>, Vec<_>) = self.backends.iter().map(|_| pipe()).unzip();

        let writes = self
            .backends
            .iter()
            .zip(readers)
            .map(|(backend, reader)| backend.store(path, reader, &lane_cancel));

        let (pumped, results) = tokio::join!(fan_out(input, writers, cancel), join_all(writes));

        let mut details = MirrorFailureDetails::default();
        if let Err(e) = pumped {
            tracing::warn!(path, error = %e, "Reading mirror input failed");
            details.source_error = Some(Box::new(e));
        }
        for (idx, result) in results.into_iter().enumerate() {
            match result {
                Ok(()) => details.successes.push(idx),
                Err(e) => {
                    tracing::warn!(path, backend_index = idx, error = %e, "Backend write failed");
                    details.failures.push((idx, Box::new(e)));
                }
            }
        }

        if details.is_clean() {
            tracing::debug!(path, backends = self.backends.len(), "Mirrored object");
            return Ok(());
        }

        tracing::error!(
            path,
            success_count = details.success_count(),
            failure_count = details.failure_count(),
            source_failed = details.has_source_error(),
            "Mirror write failed"
        );

        if details.has_successes() {
            tracing::info!(
                path,
                rollback_count = details.successes.len(),
                "Starting rollback"
            );
            let successes = details.successes.clone();
            details.rollback_errors = self.rollback_writes(path, &successes).await;
            if details.has_rollback_errors() {
                tracing::error!(
                    path,
                    rollback_error_count = details.rollback_errors.len(),
                    "Rollback incomplete, replicas may be inconsistent"
                );
                return Err(Error::RollbackFailure(details));
            }
            tracing::info!(path, "Rollback completed successfully");
        }

        Err(Error::MirrorFailure(details))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        // Delete from all backends in parallel
        let results = join_all(self.backends.iter().map(|backend| backend.delete(path))).await;

        let mut details = MirrorFailureDetails::default();
        for (idx, result) in results.into_iter().enumerate() {
            match result {
                Ok(()) => details.successes.push(idx),
                Err(e) => details.failures.push((idx, Box::new(e))),
            }
        }

        if details.has_failures() {
            tracing::error!(
                path,
                successes = details.success_count(),
                failures = details.failure_count(),
                "Delete failed on some backends"
            );
            return Err(Error::MirrorFailure(details));
        }
        Ok(())
    }

    async fn retrieve(&self, path: &str) -> Result<Self::Reader> {
        self.first_success(path, |backend| backend.retrieve(path))
            .await
    }

    async fn size(&self, path: &str) -> Result<u64> {
        self.first_success(path, |backend| backend.size(path)).await
    }

    async fn modified(&self, path: &str) -> Result<SystemTime> {
        self.first_success(path, |backend| backend.modified(path))
            .await
    }
}

/// Builder for [`Mirror`].
pub struct MirrorBuilder<S: Store> {
    backends: Vec<S>,
    base_url: Option<String>,
}

impl<S: Store> MirrorBuilder<S> {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            base_url: None,
        }
    }

    /// Add a backend. Backends added first are read first.
    pub fn add_backend(mut self, backend: S) -> Self {
        self.backends.push(backend);
        self
    }

    /// Set the public URL prefix (default: the first backend's).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Build the mirror.
    ///
    /// # Panics
    ///
    /// Panics if no backend was added.
    pub fn build(self) -> Mirror<S> {
        assert!(
            !self.backends.is_empty(),
            "Mirror requires at least one backend"
        );

        Mirror {
            backends: self.backends,
            base_url: self.base_url,
        }
    }
}

impl<S: Store> Default for MirrorBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Store> Debug for MirrorBuilder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorBuilder")
            .field("backend_count", &self.backends.len())
            .field("base_url", &self.base_url)
            .finish()
    }
}
