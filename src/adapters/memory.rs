use crate::copy::copy_cancelable;
use crate::{Error, Result, Store};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct MemoryObject {
    data: Bytes,
    modified: SystemTime,
}

/// A simple in-memory [`Store`].
///
/// - Objects are kept as [`Bytes`] in a `HashMap` keyed by path.
/// - Input is fully read before the map is touched, so a failed or cancelled
///   write never replaces the previous object.
/// - Intended for tests, local development, and ephemeral usage.
///
/// Clones share the same contents.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<String, MemoryObject>>>,
    base_url: String,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the public URL prefix objects are served under.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Returns the number of stored objects.
    pub fn len(&self) -> usize {
        self.inner.read().expect("poisoned lock").len()
    }

    /// Returns true if there are no stored objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all objects.
    pub fn clear(&self) {
        self.inner.write().expect("poisoned lock").clear();
    }

    /// Sorted list of stored paths.
    pub fn paths(&self) -> Vec<String> {
        let map = self.inner.read().expect("poisoned lock");
        let mut paths: Vec<String> = map.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn object(&self, path: &str) -> Result<MemoryObject> {
        let map = self.inner.read().expect("poisoned lock");
        map.get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Avoid dumping potentially large in-memory contents.
        f.debug_struct("MemoryStore")
            .field("len", &self.len())
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Store for MemoryStore {
    type Reader = Cursor<Bytes>;

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn store<R: AsyncRead + Send + Unpin>(
        &self,
        path: &str,
        mut input: R,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut buf = Vec::new();
        copy_cancelable(cancel, &mut input, &mut buf).await?;

        let object = MemoryObject {
            data: Bytes::from(buf),
            modified: SystemTime::now(),
        };
        let mut map = self.inner.write().expect("poisoned lock");
        map.insert(path.to_string(), object);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut map = self.inner.write().expect("poisoned lock");
        map.remove(path);
        Ok(())
    }

    async fn retrieve(&self, path: &str) -> Result<Self::Reader> {
        Ok(Cursor::new(self.object(path)?.data))
    }

    async fn size(&self, path: &str) -> Result<u64> {
        Ok(self.object(path)?.data.len() as u64)
    }

    async fn modified(&self, path: &str) -> Result<SystemTime> {
        Ok(self.object(path)?.modified)
    }
}
