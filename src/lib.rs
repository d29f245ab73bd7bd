use std::fmt::Debug;
use std::time::SystemTime;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek};

#[cfg(feature = "memory")]
pub use adapters::memory::MemoryStore;

#[cfg(feature = "local")]
pub use adapters::local::LocalStore;

pub use adapters::multi;
pub use adapters::multi::{Mirror, MirrorBuilder};

#[cfg(feature = "config")]
pub use config::StoreConfig;

pub use copy::{COPY_CHUNK_SIZE, copy_cancelable};
pub use writer::ObjectWriter;

// Re-exported so callers can cancel writes without depending on tokio-util.
pub use tokio_util::sync::CancellationToken;

#[cfg(feature = "config")]
pub mod config;
pub mod copy;
pub mod pipe;
#[cfg(feature = "local")]
pub mod temp_file;
pub mod writer;

/// A specialized Result type for Store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Details about a failed replicated operation.
///
/// Every sub-error is kept with the index of the backend that produced it.
/// Rollback errors are tracked separately from write errors: a non-empty
/// `rollback_errors` means some backend may still hold a copy that the others
/// do not.
///
/// ```
/// # use dogbox_store::{Error, MemoryStore, Mirror, StoreExt};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mirror = Mirror::new(vec![MemoryStore::new(), MemoryStore::new()]);
/// match mirror.put_bytes("a/b.png", b"data").await {
///     Err(Error::MirrorFailure(details)) | Err(Error::RollbackFailure(details)) => {
///         for (idx, error) in &details.failures {
///             eprintln!("backend {idx}: {error}");
///         }
///     }
///     _ => {}
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MirrorFailureDetails {
    /// Error raised while reading the caller's input (including cancellation).
    pub source_error: Option<Box<Error>>,
    /// Indices of backends that succeeded
    pub successes: Vec<usize>,
    /// Indices and errors of backends that failed
    pub failures: Vec<(usize, Box<Error>)>,
    /// Errors raised by compensating deletes
    pub rollback_errors: Vec<(usize, Box<Error>)>,
}

impl MirrorFailureDetails {
    /// Total number of backends that reported an outcome
    pub fn total_backends(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn success_count(&self) -> usize {
        self.successes.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn has_successes(&self) -> bool {
        !self.successes.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// True when the caller's input failed, independently of the backends.
    pub fn has_source_error(&self) -> bool {
        self.source_error.is_some()
    }

    /// True when a rollback delete failed. The replica set may be inconsistent.
    pub fn has_rollback_errors(&self) -> bool {
        !self.rollback_errors.is_empty()
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|(idx, _)| *idx).collect()
    }

    pub fn successful_indices(&self) -> &[usize] {
        &self.successes
    }

    /// True when there is nothing to report.
    pub fn is_clean(&self) -> bool {
        self.source_error.is_none() && self.failures.is_empty() && self.rollback_errors.is_empty()
    }
}

impl std::fmt::Display for MirrorFailureDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "mirror operation failed: {} succeeded, {} failed",
            self.success_count(),
            self.failure_count()
        )?;
        if let Some(err) = &self.source_error {
            write!(f, "; source: {err}")?;
        }
        for (idx, err) in &self.failures {
            write!(f, "; backend {idx}: {err}")?;
        }
        if self.has_rollback_errors() {
            write!(
                f,
                "; ROLLBACK INCOMPLETE, replicas may be inconsistent ({} errors)",
                self.rollback_errors.len()
            )?;
            for (idx, err) in &self.rollback_errors {
                write!(f, "; rollback of backend {idx}: {err}")?;
            }
        }
        Ok(())
    }
}

/// A unified Error type for store operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation canceled after {copied} bytes")]
    Canceled { copied: u64 },

    #[error("{0}")]
    MirrorFailure(MirrorFailureDetails),

    #[error("{0}")]
    RollbackFailure(MirrorFailureDetails),

    #[error("Background write task failed: {0}")]
    Task(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// True for a cancellation, including one reported through a mirror aggregate.
    pub fn is_canceled(&self) -> bool {
        match self {
            Error::Canceled { .. } => true,
            Error::MirrorFailure(details) | Error::RollbackFailure(details) => details
                .source_error
                .as_deref()
                .is_some_and(Error::is_canceled),
            _ => false,
        }
    }

    /// Replication details, if this is a mirror failure of either kind.
    pub fn mirror_details(&self) -> Option<&MirrorFailureDetails> {
        match self {
            Error::MirrorFailure(details) | Error::RollbackFailure(details) => Some(details),
            _ => None,
        }
    }
}

/// Adapter modules, gated behind Cargo features.
pub mod adapters {
    #[cfg(feature = "local")]
    pub mod local;
    #[cfg(feature = "memory")]
    pub mod memory;
    pub mod multi;
}

/// The core store trait.
///
/// Objects are addressed by an opaque string path. A successful [`store`](Store::store)
/// replaces the whole object atomically; readers never observe partial content.
///
/// Uses Tokio's [`AsyncRead`] for input and returns a seekable reader on retrieval.
/// The trait is not dyn-compatible; compose heterogeneous backends with an enum.
pub trait Store: Send + Sync + Debug {
    /// Handle returned by [`retrieve`](Store::retrieve). Dropping it releases the object.
    type Reader: AsyncRead + AsyncSeek + Send + Unpin + 'static;

    /// Public URL prefix objects in this store are served under.
    fn base_url(&self) -> &str;

    /// Consume `input` to the end and persist it at `path`, replacing any existing object.
    ///
    /// On failure or cancellation the previous object (if any) is left as it was.
    fn store<R: AsyncRead + Send + Unpin>(
        &self,
        path: &str,
        input: R,
        cancel: &CancellationToken,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Delete the object at `path`. Idempotent (returns `Ok(())` if already absent).
    fn delete(&self, path: &str) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Open the object at `path` for reading. Fails with [`Error::NotFound`] if absent.
    fn retrieve(
        &self,
        path: &str,
    ) -> impl std::future::Future<Output = Result<Self::Reader>> + Send;

    /// Size of the object in bytes.
    fn size(&self, path: &str) -> impl std::future::Future<Output = Result<u64>> + Send;

    /// Last modification time of the object.
    fn modified(&self, path: &str) -> impl std::future::Future<Output = Result<SystemTime>> + Send;
}

/// Convenience methods built on [`Store`].
pub trait StoreExt: Store {
    /// Public URL for `path`, joining the base URL and the path with a single `/`.
    fn file_url(&self, path: &str) -> String {
        let base = self.base_url().trim_end_matches('/');
        format!("{}/{}", base, path.trim_start_matches('/'))
    }

    /// Check whether an object exists.
    fn exists(&self, path: &str) -> impl std::future::Future<Output = Result<bool>> + Send {
        async move {
            match self.size(path).await {
                Ok(_) => Ok(true),
                Err(Error::NotFound(_)) => Ok(false),
                Err(e) => Err(e),
            }
        }
    }

    /// Read an object into memory.
    fn get_bytes(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send {
        async move {
            let mut reader = self.retrieve(path).await?;
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await?;
            Ok(buf)
        }
    }

    /// Read an object as a UTF-8 string.
    fn get_string(&self, path: &str) -> impl std::future::Future<Output = Result<String>> + Send {
        async move {
            let bytes = self.get_bytes(path).await?;
            String::from_utf8(bytes).map_err(|e| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("invalid utf-8: {e}"),
                ))
            })
        }
    }

    /// Store a byte slice.
    fn put_bytes(
        &self,
        path: &str,
        bytes: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send {
        async move {
            let cancel = CancellationToken::new();
            self.store(path, bytes, &cancel).await
        }
    }

    /// Copy `src` to `dst` within this store by streaming.
    fn copy_object(
        &self,
        src: &str,
        dst: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send {
        async move {
            let reader = self.retrieve(src).await?;
            let cancel = CancellationToken::new();
            self.store(dst, reader, &cancel).await
        }
    }

    /// Move `src` to `dst` by copying then deleting the source.
    ///
    /// If the copy fails the source is left untouched. If the delete fails
    /// after a successful copy, the error is returned and the object exists
    /// under both paths.
    fn move_object(
        &self,
        src: &str,
        dst: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send {
        async move {
            self.copy_object(src, dst).await?;
            self.delete(src).await
        }
    }

    /// Copy an object from this store into `dest` under the same path.
    fn copy_to<S2: Store>(
        &self,
        path: &str,
        dest: &S2,
    ) -> impl std::future::Future<Output = Result<()>> + Send {
        async move {
            let reader = self.retrieve(path).await?;
            let cancel = CancellationToken::new();
            dest.store(path, reader, &cancel).await
        }
    }
}

impl<T: Store + ?Sized> StoreExt for T {}
