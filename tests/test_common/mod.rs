//! Common test utilities and a reusable contract suite for stores
//!
//! `store_test_suite!` generates the same set of tests for any `Store`
//! implementation; `FaultyStore` injects failures around a real backend.

#![allow(dead_code)]

use bytes::Bytes;
use dogbox_store::{CancellationToken, Error, Result, Store, StoreExt};
use std::io::SeekFrom;
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tokio_util::io::StreamReader;

/// Macro to generate the contract suite for a Store implementation.
///
/// `setup` must evaluate to `(store, guard)`; the guard is kept alive for the
/// duration of the test (e.g. a `TempDir`).
///
/// ```ignore
/// store_test_suite!(setup = (MemoryStore::new(), ()));
/// ```
macro_rules! store_test_suite {
    (setup = $setup:expr) => {
        mod store_test_suite {
            use super::*;

            #[tokio::test]
            async fn test_round_trip() {
                let (store, _guard) = $setup;
                test_common::run_round_trip(&store).await;
            }

            #[tokio::test]
            async fn test_get_nonexistent() {
                let (store, _guard) = $setup;
                test_common::run_get_nonexistent(&store).await;
            }

            #[tokio::test]
            async fn test_delete_existing() {
                let (store, _guard) = $setup;
                test_common::run_delete_existing(&store).await;
            }

            #[tokio::test]
            async fn test_delete_idempotent() {
                let (store, _guard) = $setup;
                test_common::run_delete_idempotent(&store).await;
            }

            #[tokio::test]
            async fn test_overwrite() {
                let (store, _guard) = $setup;
                test_common::run_overwrite(&store).await;
            }

            #[tokio::test]
            async fn test_empty_data() {
                let (store, _guard) = $setup;
                test_common::run_empty_data(&store).await;
            }

            #[tokio::test]
            async fn test_large_data() {
                let (store, _guard) = $setup;
                test_common::run_large_data(&store).await;
            }

            #[tokio::test]
            async fn test_binary_data() {
                let (store, _guard) = $setup;
                test_common::run_binary_data(&store).await;
            }

            #[tokio::test]
            async fn test_size_and_modified() {
                let (store, _guard) = $setup;
                test_common::run_size_and_modified(&store).await;
            }

            #[tokio::test]
            async fn test_reader_is_seekable() {
                let (store, _guard) = $setup;
                test_common::run_reader_is_seekable(&store).await;
            }

            #[tokio::test]
            async fn test_failed_input_keeps_previous() {
                let (store, _guard) = $setup;
                test_common::run_failed_input_keeps_previous(&store).await;
            }

            #[tokio::test]
            async fn test_canceled_store_keeps_previous() {
                let (store, _guard) = $setup;
                test_common::run_canceled_store_keeps_previous(&store).await;
            }

            #[tokio::test]
            async fn test_copy_and_move() {
                let (store, _guard) = $setup;
                test_common::run_copy_and_move(&store).await;
            }

            #[tokio::test]
            async fn test_concurrent_distinct_paths() {
                let (store, _guard) = $setup;
                test_common::run_concurrent_distinct_paths(&store).await;
            }
        }
    };
}

/// Install a tracing subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A source that yields `prefix` and then fails.
pub fn failing_reader(prefix: &'static [u8]) -> impl AsyncRead + Send + Unpin {
    StreamReader::new(futures::stream::iter(vec![
        Ok(Bytes::from_static(prefix)),
        Err(std::io::Error::other("connection reset by peer")),
    ]))
}

pub async fn run_round_trip<S: Store>(store: &S) {
    let data = b"hello world";

    store.put_bytes("test.txt", data).await.unwrap();

    assert_eq!(store.get_bytes("test.txt").await.unwrap(), data);
    assert!(store.exists("test.txt").await.unwrap());
}

pub async fn run_get_nonexistent<S: Store>(store: &S) {
    let err = store.get_bytes("nonexistent.txt").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {err:?}");

    assert!(store.size("nonexistent.txt").await.unwrap_err().is_not_found());
    assert!(store.modified("nonexistent.txt").await.unwrap_err().is_not_found());
    assert!(!store.exists("nonexistent.txt").await.unwrap());
}

pub async fn run_delete_existing<S: Store>(store: &S) {
    store.put_bytes("test.txt", b"hello").await.unwrap();
    assert!(store.exists("test.txt").await.unwrap());

    store.delete("test.txt").await.unwrap();

    assert!(!store.exists("test.txt").await.unwrap());
    let err = store
        .retrieve("test.txt")
        .await
        .err()
        .expect("retrieve after delete succeeded");
    assert!(err.is_not_found());
}

pub async fn run_delete_idempotent<S: Store>(store: &S) {
    // Delete non-existent object should not error
    store.delete("test.txt").await.unwrap();
    store.delete("test.txt").await.unwrap();
}

pub async fn run_overwrite<S: Store>(store: &S) {
    store.put_bytes("test.txt", b"original").await.unwrap();
    store.put_bytes("test.txt", b"updated").await.unwrap();

    assert_eq!(store.get_bytes("test.txt").await.unwrap(), b"updated");
    assert_eq!(store.size("test.txt").await.unwrap(), 7);
}

pub async fn run_empty_data<S: Store>(store: &S) {
    store.put_bytes("empty.txt", b"").await.unwrap();

    assert!(store.exists("empty.txt").await.unwrap());
    assert_eq!(store.size("empty.txt").await.unwrap(), 0);
    assert!(store.get_bytes("empty.txt").await.unwrap().is_empty());
}

pub async fn run_large_data<S: Store>(store: &S) {
    let data: Vec<u8> = (0..1_000_000).map(|i| (i % 256) as u8).collect();

    store.put_bytes("large.bin", &data).await.unwrap();

    assert_eq!(store.get_bytes("large.bin").await.unwrap(), data);
    assert_eq!(store.size("large.bin").await.unwrap(), data.len() as u64);
}

pub async fn run_binary_data<S: Store>(store: &S) {
    let data: Vec<u8> = (0..=255).collect();

    store.put_bytes("binary.dat", &data).await.unwrap();

    assert_eq!(store.get_bytes("binary.dat").await.unwrap(), data);
}

pub async fn run_size_and_modified<S: Store>(store: &S) {
    let before = SystemTime::now() - std::time::Duration::from_secs(5);

    store.put_bytes("meta.txt", b"12345").await.unwrap();

    assert_eq!(store.size("meta.txt").await.unwrap(), 5);
    let modified = store.modified("meta.txt").await.unwrap();
    assert!(modified >= before);
}

pub async fn run_reader_is_seekable<S: Store>(store: &S) {
    store.put_bytes("seek.txt", b"0123456789").await.unwrap();

    let mut reader = store.retrieve("seek.txt").await.unwrap();
    reader.seek(SeekFrom::Start(6)).await.unwrap();
    let mut tail = String::new();
    reader.read_to_string(&mut tail).await.unwrap();
    assert_eq!(tail, "6789");

    reader.seek(SeekFrom::Start(0)).await.unwrap();
    let mut head = [0u8; 3];
    reader.read_exact(&mut head).await.unwrap();
    assert_eq!(&head, b"012");
}

pub async fn run_failed_input_keeps_previous<S: Store>(store: &S) {
    store.put_bytes("keep.txt", b"previous").await.unwrap();

    let cancel = CancellationToken::new();
    let result = store
        .store("keep.txt", failing_reader(b"partial new content"), &cancel)
        .await;

    assert!(result.is_err());
    assert_eq!(store.get_bytes("keep.txt").await.unwrap(), b"previous");
}

pub async fn run_canceled_store_keeps_previous<S: Store>(store: &S) {
    store.put_bytes("keep.txt", b"previous").await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = store
        .store("keep.txt", &b"never published"[..], &cancel)
        .await
        .unwrap_err();

    assert!(err.is_canceled(), "got {err:?}");
    assert_eq!(store.get_bytes("keep.txt").await.unwrap(), b"previous");
}

pub async fn run_copy_and_move<S: Store>(store: &S) {
    store.put_bytes("src.txt", b"payload").await.unwrap();

    store.copy_object("src.txt", "copy.txt").await.unwrap();
    assert_eq!(store.get_bytes("src.txt").await.unwrap(), b"payload");
    assert_eq!(store.get_bytes("copy.txt").await.unwrap(), b"payload");

    store.move_object("copy.txt", "moved.txt").await.unwrap();
    assert!(!store.exists("copy.txt").await.unwrap());
    assert_eq!(store.get_bytes("moved.txt").await.unwrap(), b"payload");

    // A failed copy leaves the destination absent
    let err = store.move_object("missing.txt", "dst.txt").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(!store.exists("dst.txt").await.unwrap());
}

pub async fn run_concurrent_distinct_paths<S: Store>(store: &S) {
    let a: Vec<u8> = vec![b'a'; 200_000];
    let b: Vec<u8> = vec![b'b'; 300_000];

    let (ra, rb) = tokio::join!(
        store.put_bytes("same/a.bin", &a),
        store.put_bytes("same/b.bin", &b)
    );
    ra.unwrap();
    rb.unwrap();

    assert_eq!(store.get_bytes("same/a.bin").await.unwrap(), a);
    assert_eq!(store.get_bytes("same/b.bin").await.unwrap(), b);
}

/// Wraps a store and injects failures.
#[derive(Debug, Clone, Default)]
pub struct FaultyStore<S> {
    pub inner: S,
    pub fail_writes: Option<&'static str>,
    pub reject_writes: Option<&'static str>,
    pub fail_deletes: Option<&'static str>,
    pub fail_reads: Option<&'static str>,
}

impl<S: Store> FaultyStore<S> {
    pub fn healthy(inner: S) -> Self {
        Self {
            inner,
            fail_writes: None,
            reject_writes: None,
            fail_deletes: None,
            fail_reads: None,
        }
    }

    pub fn failing_writes(inner: S, message: &'static str) -> Self {
        Self {
            fail_writes: Some(message),
            ..Self::healthy(inner)
        }
    }

    /// Fails writes without reading any input.
    pub fn rejecting_writes(inner: S, message: &'static str) -> Self {
        Self {
            reject_writes: Some(message),
            ..Self::healthy(inner)
        }
    }

    pub fn failing_deletes(inner: S, message: &'static str) -> Self {
        Self {
            fail_deletes: Some(message),
            ..Self::healthy(inner)
        }
    }

    pub fn failing_reads(inner: S, message: &'static str) -> Self {
        Self {
            fail_reads: Some(message),
            ..Self::healthy(inner)
        }
    }
}

fn injected(message: &str) -> Error {
    Error::Io(std::io::Error::other(message.to_string()))
}

impl<S: Store> Store for FaultyStore<S> {
    type Reader = S::Reader;

    fn base_url(&self) -> &str {
        self.inner.base_url()
    }

    async fn store<R: AsyncRead + Send + Unpin>(
        &self,
        path: &str,
        mut input: R,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if let Some(message) = self.reject_writes {
            return Err(injected(message));
        }
        match self.fail_writes {
            Some(message) => {
                // Consume the stream like a real disk would before running out of space
                let mut sink = tokio::io::sink();
                dogbox_store::copy_cancelable(cancel, &mut input, &mut sink).await?;
                Err(injected(message))
            }
            None => self.inner.store(path, input, cancel).await,
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match self.fail_deletes {
            Some(message) => Err(injected(message)),
            None => self.inner.delete(path).await,
        }
    }

    async fn retrieve(&self, path: &str) -> Result<Self::Reader> {
        match self.fail_reads {
            Some(message) => Err(injected(message)),
            None => self.inner.retrieve(path).await,
        }
    }

    async fn size(&self, path: &str) -> Result<u64> {
        match self.fail_reads {
            Some(message) => Err(injected(message)),
            None => self.inner.size(path).await,
        }
    }

    async fn modified(&self, path: &str) -> Result<SystemTime> {
        match self.fail_reads {
            Some(message) => Err(injected(message)),
            None => self.inner.modified(path).await,
        }
    }
}
