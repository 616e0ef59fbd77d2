//! Command implementations, independent of argument parsing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use adslot_cache::{
    BlobStore, CacheConfig, CacheEntry, CacheStore, Definition, DirBlobStore, HttpBlobStore,
    Materializer, Resolution,
};
use anyhow::{Context, Result};
use tracing::{debug, info};

/// Loads the cache configuration, applying a cache root override.
pub fn load_config(path: Option<&Path>, cache_root: Option<&Path>) -> Result<CacheConfig> {
    let config = match path {
        Some(path) => CacheConfig::load(path)?,
        None => CacheConfig::default(),
    };
    Ok(match cache_root {
        Some(root) => config.with_cache_root(root),
        None => config,
    })
}

/// Slot id implied by a definition file name.
pub fn slot_id_from_path(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(ToOwned::to_owned)
        .with_context(|| format!("cannot derive a slot id from {}", path.display()))
}

/// Resolves the definition document at `definition` for `slot_id`.
///
/// Blobs come from `blobs` when given, otherwise from the configured
/// blob-storage endpoint.
pub async fn run_resolve(
    config: &CacheConfig,
    slot_id: &str,
    definition: &Path,
    blobs: Option<&Path>,
) -> Result<Resolution> {
    let text = tokio::fs::read_to_string(definition)
        .await
        .with_context(|| format!("read {}", definition.display()))?;
    let document: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("parse {}", definition.display()))?;

    let Some(definition) = Definition::from_document(slot_id, &document)? else {
        info!(slot = slot_id, "definition is inactive");
        return Ok(Resolution::Absent);
    };

    let blobs: Arc<dyn BlobStore> = match blobs {
        Some(dir) => {
            debug!(root = %dir.display(), "serving blobs from directory");
            Arc::new(DirBlobStore::new(dir))
        }
        None => Arc::new(
            HttpBlobStore::new(&config.blob_base_url, config.request_timeout())
                .context("create blob storage client")?,
        ),
    };

    Ok(Materializer::new(config, blobs)
        .resolve(slot_id, &definition)
        .await)
}

/// Cached file for `slot_id`, if recorded and still on disk.
pub fn run_cached(config: &CacheConfig, slot_id: &str) -> Option<PathBuf> {
    CacheStore::new(config)
        .lookup(slot_id)
        .filter(CacheEntry::file_exists)
        .map(|entry| entry.local_path)
}

/// State of one index entry's file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// File exists; contents not checked.
    Present,
    /// File matches the recorded digest.
    Verified,
    /// File exists but its digest differs, or none was recorded.
    Mismatch,
    /// File is gone; the next resolve fetches it again.
    Missing,
}

impl EntryStatus {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Verified => "verified",
            Self::Mismatch => "mismatch",
            Self::Missing => "missing",
        }
    }
}

/// One row of `adslot index`.
#[derive(Debug, Clone)]
pub struct IndexRow {
    pub key: String,
    pub entry: CacheEntry,
    pub status: EntryStatus,
}

/// Every index entry, in key order.
pub fn run_index(config: &CacheConfig, verify: bool) -> Result<Vec<IndexRow>> {
    let store = CacheStore::new(config);
    let index = store.load();

    let mut rows = Vec::with_capacity(index.len());
    for (key, entry) in index.iter() {
        let status = if !entry.file_exists() {
            EntryStatus::Missing
        } else if !verify {
            EntryStatus::Present
        } else if store
            .verify(entry)
            .with_context(|| format!("verify {}", entry.local_path.display()))?
        {
            EntryStatus::Verified
        } else {
            EntryStatus::Mismatch
        };
        rows.push(IndexRow {
            key: key.clone(),
            entry: entry.clone(),
            status,
        });
    }
    Ok(rows)
}
