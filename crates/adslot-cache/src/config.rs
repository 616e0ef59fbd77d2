//! Configuration for the slot cache.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default blob endpoint that `gs://` locators are resolved against.
pub const DEFAULT_BLOB_BASE_URL: &str = "https://storage.googleapis.com";

/// Settings shared by the cache store, fetcher and watcher.
///
/// Every field has a default, so a config file only needs to name what it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// The application's cache area. Assets and the index live below it.
    pub cache_root: PathBuf,

    /// Name of the subdirectory holding downloaded asset bytes.
    pub asset_dir_name: String,

    /// Name of the index file, a sibling of the asset directory.
    pub index_file_name: String,

    /// Prefix prepended to a slot id to form its index key.
    pub key_prefix: String,

    /// Base URL the HTTP blob backend maps `gs://bucket/path` onto.
    pub blob_base_url: String,

    /// Timeout for a single blob request.
    pub request_timeout_secs: u64,

    /// Delete files of older versions after a successful cache fill.
    pub sweep_superseded: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_root: std::env::temp_dir().join("adslot"),
            asset_dir_name: "slot-assets".to_string(),
            index_file_name: "slot-assets-meta.json".to_string(),
            key_prefix: "ad_".to_string(),
            blob_base_url: DEFAULT_BLOB_BASE_URL.to_string(),
            request_timeout_secs: 30,
            sweep_superseded: true,
        }
    }
}

impl CacheConfig {
    /// Creates a config rooted at the given cache area.
    #[must_use]
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Default::default()
        }
    }

    /// Loads a config from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded cache config");
        Ok(config)
    }

    /// Sets the cache area.
    #[must_use]
    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = root.into();
        self
    }

    /// Sets the blob base URL.
    #[must_use]
    pub fn with_blob_base_url(mut self, url: impl Into<String>) -> Self {
        self.blob_base_url = url.into();
        self
    }

    /// Enables or disables the superseded-version sweep.
    #[must_use]
    pub fn with_sweep_superseded(mut self, enable: bool) -> Self {
        self.sweep_superseded = enable;
        self
    }

    /// Directory holding the cached asset files.
    #[must_use]
    pub fn asset_dir(&self) -> PathBuf {
        self.cache_root.join(&self.asset_dir_name)
    }

    /// Location of the serialized cache index.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.cache_root.join(&self.index_file_name)
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
