use crate::copy::copy_cancelable;
use crate::temp_file::TempFile;
use crate::{Error, Result, Store};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::AsyncRead;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Mode for directories created by the store (`rwxr-xr-x`).
pub const DIR_PERMISSIONS: u32 = 0o755;

/// Mode applied to every published object (`rw-r--r--`).
pub const FILE_PERMISSIONS: u32 = 0o644;

/// A local filesystem store.
///
/// - Paths are *relative* object keys (e.g. `"ab/cd.png"`) resolved under a root directory.
/// - Paths are validated to prevent directory traversal (`..`) and absolute paths.
/// - Writes go to a sibling temp file that is renamed onto the destination
///   only after the whole input was copied, so a reader sees either the old
///   object or the new one.
///
/// Mutations take an exclusive lock and reads a shared one. By default one
/// lock covers the whole root, which serializes writes to unrelated paths;
/// [`with_lock_stripes`](LocalStore::with_lock_stripes) shards it by path hash.
///
/// Clones share the root, base URL and locks.
#[derive(Clone)]
pub struct LocalStore {
    root: PathBuf,
    base_url: String,
    locks: Arc<[RwLock<()>]>,
}

impl fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStore")
            .field("root", &self.root)
            .field("base_url", &self.base_url)
            .field("lock_stripes", &self.locks.len())
            .finish()
    }
}

impl LocalStore {
    /// Create a new local store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            base_url: String::new(),
            locks: stripes(1),
        }
    }

    /// Set the public URL prefix objects are served under.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Shard the store lock into `n` stripes (minimum 1) keyed by path hash.
    ///
    /// Operations on one path always share a stripe; writes to paths on
    /// different stripes run concurrently.
    pub fn with_lock_stripes(mut self, n: usize) -> Self {
        self.locks = stripes(n.max(1));
        self
    }

    /// Return the configured root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_stripes(&self) -> usize {
        self.locks.len()
    }

    fn lock_for(&self, path: &str) -> &RwLock<()> {
        if self.locks.len() == 1 {
            return &self.locks[0];
        }
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        &self.locks[(hasher.finish() % self.locks.len() as u64) as usize]
    }

    fn validate_path(path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(Error::InvalidPath("path cannot be empty".into()));
        }

        let p = Path::new(path);

        if p.is_absolute() {
            return Err(Error::PermissionDenied(format!(
                "absolute paths are not allowed: {path}"
            )));
        }

        let mut has_name = false;
        for c in p.components() {
            match c {
                Component::ParentDir => {
                    return Err(Error::PermissionDenied(format!(
                        "parent dir components ('..') are not allowed: {path}"
                    )));
                }
                Component::Prefix(_) => {
                    // Windows drive prefixes like C:\
                    return Err(Error::PermissionDenied(format!(
                        "path prefixes are not allowed: {path}"
                    )));
                }
                Component::RootDir => {
                    return Err(Error::PermissionDenied(format!(
                        "root dir component is not allowed: {path}"
                    )));
                }
                Component::Normal(_) => has_name = true,
                Component::CurDir => {}
            }
        }

        if !has_name {
            return Err(Error::InvalidPath(format!("path names no object: {path}")));
        }

        Ok(())
    }

    fn path_for(&self, path: &str) -> Result<PathBuf> {
        Self::validate_path(path)?;
        Ok(self.root.join(path))
    }

    async fn metadata(&self, path: &str) -> Result<std::fs::Metadata> {
        let full = self.path_for(path)?;
        let _guard = self.lock_for(path).read().await;
        match tokio::fs::metadata(&full).await {
            Ok(md) if md.is_file() => Ok(md),
            Ok(_) => Err(Error::NotFound(path.to_string())),
            Err(e) if is_absent(&e) => Err(Error::NotFound(path.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

/// True if `e` means nothing exists at the path, including when a parent
/// component is a regular file.
fn is_absent(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
    )
}

fn stripes(n: usize) -> Arc<[RwLock<()>]> {
    (0..n).map(|_| RwLock::new(())).collect()
}

/// Create `dir` and its missing parents with [`DIR_PERMISSIONS`].
pub(crate) async fn create_dir_all(dir: &Path) -> Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(DIR_PERMISSIONS);
    builder.create(dir).await?;
    Ok(())
}

async fn set_file_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(FILE_PERMISSIONS))
            .await?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

impl Store for LocalStore {
    type Reader = tokio::fs::File;

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn store<R: AsyncRead + Send + Unpin>(
        &self,
        path: &str,
        mut input: R,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let dest = self.path_for(path)?;
        let _guard = self.lock_for(path).write().await;

        if let Some(parent) = dest.parent() {
            create_dir_all(parent).await?;
        }

        let mut temp = TempFile::create(&dest).await?;
        let result = async {
            let file = temp
                .file_mut()
                .ok_or_else(|| Error::InvalidPath(format!("temp file already closed: {path}")))?;
            let copied = copy_cancelable(cancel, &mut input, file).await?;
            set_file_permissions(temp.path()).await?;
            temp.save(&dest).await?;
            Ok::<_, Error>(copied)
        }
        .await;

        match result {
            Ok(copied) => {
                tracing::debug!(path, bytes = copied, "Stored object");
                Ok(())
            }
            Err(e) => {
                if let Err(cleanup_err) = temp.cleanup().await {
                    tracing::warn!(path, error = %cleanup_err, "Failed to remove temp file");
                }
                tracing::debug!(path, error = %e, "Store failed, destination untouched");
                Err(e)
            }
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.path_for(path)?;
        let _guard = self.lock_for(path).write().await;
        match tokio::fs::remove_file(full).await {
            Ok(()) => {
                tracing::debug!(path, "Deleted object");
                Ok(())
            }
            Err(e) if is_absent(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn retrieve(&self, path: &str) -> Result<Self::Reader> {
        let full = self.path_for(path)?;
        let _guard = self.lock_for(path).read().await;
        let file = match tokio::fs::File::open(&full).await {
            Ok(f) => f,
            Err(e) if is_absent(&e) => return Err(Error::NotFound(path.to_string())),
            Err(e) => return Err(e.into()),
        };
        if !file.metadata().await?.is_file() {
            return Err(Error::NotFound(path.to_string()));
        }
        Ok(file)
    }

    async fn size(&self, path: &str) -> Result<u64> {
        Ok(self.metadata(path).await?.len())
    }

    async fn modified(&self, path: &str) -> Result<SystemTime> {
        Ok(self.metadata(path).await?.modified()?)
    }
}
