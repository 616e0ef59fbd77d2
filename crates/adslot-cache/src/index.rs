//! Durable index of what is cached on disk.
//!
//! The index is a single pretty-printed JSON object keyed by cache key.
//! It is read from disk on every materialization and rewritten in full after
//! every mutation; nothing is kept in memory between calls.
//!
//! Both directions fail soft. A missing or corrupt file loads as an empty
//! index, and a failed write is logged and dropped. The worst outcome of
//! either is a redundant download later on.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::error::{FetchError, Result};
use crate::hash::digest_file;

/// One previously materialized definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    #[serde(default)]
    pub slot_id: String,
    pub version: i64,
    pub local_path: PathBuf,
    /// Diagnostics only. Entries written without it load as the epoch.
    #[serde(default)]
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the bytes as written. Diagnostics only.
    #[serde(default)]
    pub sha256: String,
}

impl CacheEntry {
    /// Whether the referenced file is still on disk.
    #[must_use]
    pub fn file_exists(&self) -> bool {
        self.local_path.is_file()
    }
}

/// Mapping from cache key to [`CacheEntry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheIndex {
    entries: BTreeMap<String, CacheEntry>,
}

impl CacheIndex {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Inserts or overwrites the entry for `key`.
    pub fn insert(&mut self, key: impl Into<String>, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(key.into(), entry)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, CacheEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// On-disk home of the cache index and the asset directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    asset_dir: PathBuf,
    index_path: PathBuf,
    key_prefix: String,
}

impl CacheStore {
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            asset_dir: config.asset_dir(),
            index_path: config.index_path(),
            key_prefix: config.key_prefix.clone(),
        }
    }

    /// Index key for a slot id.
    #[must_use]
    pub fn key_for(&self, slot_id: &str) -> String {
        format!("{}{}", self.key_prefix, slot_id)
    }

    #[must_use]
    pub fn asset_dir(&self) -> &Path {
        &self.asset_dir
    }

    #[must_use]
    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Creates the asset directory. Already existing is not an error;
    /// any other failure is logged.
    pub fn ensure_directory(&self) {
        if let Err(e) = fs::create_dir_all(&self.asset_dir) {
            tracing::error!(
                path = %self.asset_dir.display(),
                error = %e,
                "failed to create cache directory"
            );
        }
    }

    /// Reads the index. Never fails: missing or unparsable files yield an
    /// empty index.
    #[must_use]
    pub fn load(&self) -> CacheIndex {
        let text = match fs::read_to_string(&self.index_path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CacheIndex::default(),
            Err(e) => {
                tracing::error!(
                    path = %self.index_path.display(),
                    error = %e,
                    "failed to read cache index"
                );
                return CacheIndex::default();
            }
        };

        match serde_json::from_str(&text) {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!(
                    path = %self.index_path.display(),
                    error = %e,
                    "cache index is corrupt, starting empty"
                );
                CacheIndex::default()
            }
        }
    }

    /// Persists the index. A failure is logged and swallowed.
    pub fn save(&self, index: &CacheIndex) {
        if let Err(e) = self.try_save(index) {
            tracing::error!(error = %e, "failed to save cache index");
        }
    }

    /// Persists the index via temp file + rename so readers never observe a
    /// partial document.
    pub fn try_save(&self, index: &CacheIndex) -> Result<()> {
        let json = serde_json::to_string_pretty(index)
            .map_err(|e| FetchError::io("serialize", &self.index_path, e.into()))?;

        let parent = self
            .index_path
            .parent()
            .ok_or_else(|| {
                FetchError::io(
                    "locate parent of",
                    &self.index_path,
                    std::io::Error::other("index path has no parent directory"),
                )
            })?;
        fs::create_dir_all(parent).map_err(|e| FetchError::io("create directory", parent, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| FetchError::io("create temp file in", parent, e))?;
        tmp.write_all(json.as_bytes())
            .map_err(|e| FetchError::io("write", tmp.path().to_path_buf(), e))?;
        tmp.persist(&self.index_path)
            .map_err(|e| FetchError::io("rename", &self.index_path, e.error))?;

        tracing::debug!(
            path = %self.index_path.display(),
            entries = index.len(),
            "saved cache index"
        );
        Ok(())
    }

    /// Entry for a slot id, if one is recorded.
    #[must_use]
    pub fn lookup(&self, slot_id: &str) -> Option<CacheEntry> {
        self.load().get(&self.key_for(slot_id)).cloned()
    }

    /// Recomputes the digest of the entry's file and compares it with the
    /// recorded one. Entries written without a digest never verify.
    pub fn verify(&self, entry: &CacheEntry) -> Result<bool> {
        if entry.sha256.is_empty() {
            return Ok(false);
        }
        Ok(digest_file(&entry.local_path)? == entry.sha256)
    }

    /// [`load`](Self::load) on the blocking pool.
    pub async fn load_async(&self) -> CacheIndex {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.load())
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "cache index load task failed");
                CacheIndex::default()
            })
    }

    /// [`save`](Self::save) on the blocking pool.
    pub async fn save_async(&self, index: CacheIndex) {
        let store = self.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || store.save(&index)).await {
            tracing::error!(error = %e, "cache index save task failed");
        }
    }

    /// [`ensure_directory`](Self::ensure_directory) on the blocking pool.
    pub async fn ensure_directory_async(&self) {
        let store = self.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || store.ensure_directory()).await {
            tracing::error!(error = %e, "cache directory task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(slot_id: &str, version: i64, path: PathBuf) -> CacheEntry {
        CacheEntry {
            slot_id: slot_id.to_string(),
            version,
            local_path: path,
            fetched_at: Utc::now(),
            size_bytes: 0,
            sha256: String::new(),
        }
    }

    #[test]
    fn test_key_derivation() {
        let store = CacheStore::new(&CacheConfig::new("/tmp/x"));
        assert_eq!(store.key_for("home_banner"), "ad_home_banner");
    }

    #[test]
    fn test_load_missing_index_is_empty() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(&CacheConfig::new(dir.path()));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_load_corrupt_index_is_empty() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(&CacheConfig::new(dir.path()));
        fs::write(store.index_path(), "{ not json").unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_load_entry_without_diagnostics() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(&CacheConfig::new(dir.path()));
        let local = dir.path().join("slot-assets/home_banner_v1.png");
        let text = serde_json::json!({
            "ad_home_banner": { "version": 1, "localPath": local }
        });
        fs::write(store.index_path(), text.to_string()).unwrap();

        let entry = store.lookup("home_banner").unwrap();
        assert_eq!(entry.version, 1);
        assert_eq!(entry.local_path, local);
        assert_eq!(entry.slot_id, "");
        assert_eq!(entry.fetched_at, DateTime::<Utc>::default());
        assert!(entry.sha256.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(&CacheConfig::new(dir.path()));
        let mut index = CacheIndex::default();
        index.insert(
            store.key_for("home_banner"),
            entry("home_banner", 1, dir.path().join("home_banner_v1.png")),
        );

        store.save(&index);

        let loaded = store.load();
        assert_eq!(loaded, index);
        assert_eq!(loaded.get("ad_home_banner").unwrap().version, 1);
    }

    #[test]
    fn test_index_is_pretty_camel_case_json() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(&CacheConfig::new(dir.path()));
        let mut index = CacheIndex::default();
        index.insert("ad_a", entry("a", 2, PathBuf::from("/c/a_v2.png")));
        store.save(&index);

        let text = fs::read_to_string(store.index_path()).unwrap();
        assert!(text.contains('\n'));
        assert!(text.contains("\"ad_a\""));
        assert!(text.contains("\"localPath\""));
        assert!(text.contains("\"fetchedAt\""));
    }

    #[test]
    fn test_save_failure_is_swallowed() {
        let dir = tempdir().unwrap();
        // Root the cache under a regular file so the directory cannot exist.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();
        let store = CacheStore::new(&CacheConfig::new(blocker.join("cache")));

        assert!(store.try_save(&CacheIndex::default()).is_err());
        store.save(&CacheIndex::default());
        store.ensure_directory();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_ensure_directory_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(&CacheConfig::new(dir.path()));
        store.ensure_directory();
        store.ensure_directory();
        assert!(store.asset_dir().is_dir());
    }

    #[test]
    fn test_verify_entry() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(&CacheConfig::new(dir.path()));
        let path = dir.path().join("a_v1.bin");
        fs::write(&path, b"hello").unwrap();

        let mut recorded = entry("a", 1, path.clone());
        assert!(!store.verify(&recorded).unwrap());

        recorded.sha256 = crate::hash::digest_bytes(b"hello");
        assert!(store.verify(&recorded).unwrap());

        fs::write(&path, b"tampered").unwrap();
        assert!(!store.verify(&recorded).unwrap());
    }

    #[tokio::test]
    async fn test_async_wrappers() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(&CacheConfig::new(dir.path()));
        store.ensure_directory_async().await;

        let mut index = store.load_async().await;
        index.insert("ad_b", entry("b", 5, dir.path().join("b_v5.gif")));
        store.save_async(index).await;

        assert_eq!(store.lookup("b").unwrap().version, 5);
        assert!(store.lookup("missing").is_none());
    }
}
