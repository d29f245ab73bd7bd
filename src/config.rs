//! Deployment configuration for the store layer.

use crate::adapters::local::LocalStore;
use crate::adapters::multi::Mirror;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Environment variable holding one or more data directories, separated by
/// the platform path separator (`:` on unix).
pub const DATA_DIR_VAR: &str = "DOGBOX_DATA_DIR";
/// Environment variable holding the public URL prefix.
pub const BASE_URL_VAR: &str = "DOGBOX_BASE_URL";
/// Environment variable holding the number of lock stripes per directory.
pub const LOCK_STRIPES_VAR: &str = "DOGBOX_LOCK_STRIPES";

/// Where objects live and how they are served.
///
/// Each data directory becomes one [`LocalStore`]; all of them sit behind a
/// [`Mirror`] in the order given, so the first directory is read first.
///
/// ```
/// use dogbox_store::StoreConfig;
///
/// let config = StoreConfig::from_json(r#"{
///     "base_url": "https://dogbox.example/f",
///     "data_dirs": ["/srv/a", "/srv/b"]
/// }"#).unwrap();
/// assert_eq!(config.data_dirs.len(), 2);
/// assert_eq!(config.lock_stripes, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub base_url: String,
    pub data_dirs: Vec<PathBuf>,
    #[serde(default = "default_lock_stripes")]
    pub lock_stripes: usize,
}

fn default_lock_stripes() -> usize {
    1
}

impl StoreConfig {
    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid store config: {e}"),
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read [`DATA_DIR_VAR`], [`BASE_URL_VAR`] and [`LOCK_STRIPES_VAR`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var_os(key))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<std::ffi::OsString>) -> Result<Self> {
        let data_dirs = lookup(DATA_DIR_VAR)
            .map(|dirs| {
                std::env::split_paths(&dirs)
                    .filter(|p| !p.as_os_str().is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let base_url = lookup(BASE_URL_VAR)
            .map(|url| url.to_string_lossy().into_owned())
            .unwrap_or_default();

        let lock_stripes = match lookup(LOCK_STRIPES_VAR) {
            Some(raw) => raw.to_string_lossy().trim().parse().map_err(|e| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{LOCK_STRIPES_VAR}: {e}"),
                ))
            })?,
            None => default_lock_stripes(),
        };

        let config = Self {
            base_url,
            data_dirs,
            lock_stripes,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.data_dirs.is_empty() {
            return Err(Error::InvalidPath(format!(
                "no data directory configured (set {DATA_DIR_VAR})"
            )));
        }
        Ok(())
    }

    /// Build the configured store.
    pub fn build(&self) -> Result<Mirror<LocalStore>> {
        self.validate()?;

        let mut builder = Mirror::builder().base_url(self.base_url.clone());
        for dir in &self.data_dirs {
            if dir.exists() && !dir.is_dir() {
                return Err(Error::InvalidPath(format!(
                    "{} is not a directory",
                    dir.display()
                )));
            }
            builder = builder.add_backend(
                LocalStore::new(dir)
                    .with_base_url(self.base_url.clone())
                    .with_lock_stripes(self.lock_stripes),
            );
        }

        tracing::info!(
            backends = self.data_dirs.len(),
            base_url = %self.base_url,
            lock_stripes = self.lock_stripes,
            "Configured store"
        );
        Ok(builder.build())
    }
}
