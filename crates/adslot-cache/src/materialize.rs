//! Hit-or-fetch decision for one slot definition.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;
use crate::definition::{Asset, Definition, Resolution, ResolvedPath};
use crate::error::{FetchError, Result};
use crate::fetch::{AssetFetcher, BlobStore, version_in_file_name};
use crate::index::{CacheEntry, CacheStore};

/// Turns definitions into renderable assets, filling the cache on a miss.
///
/// Materializations for the same slot key run one at a time, so a burst of
/// duplicate pushes downloads at most once. Different slots proceed in
/// parallel.
#[derive(Debug)]
pub struct Materializer {
    store: CacheStore,
    fetcher: AssetFetcher,
    sweep_superseded: bool,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Materializer {
    #[must_use]
    pub fn new(config: &CacheConfig, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            store: CacheStore::new(config),
            fetcher: AssetFetcher::new(blobs),
            sweep_superseded: config.sweep_superseded,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Resolves a definition with no cancellation.
    pub async fn resolve(&self, slot_key: &str, definition: &Definition) -> Resolution {
        self.resolve_cancellable(slot_key, definition, &CancellationToken::new())
            .await
    }

    /// Resolves a definition to an asset.
    ///
    /// 1. Inactive definitions are absent, whatever the cache holds.
    /// 2. Non-blob locators pass through untouched.
    /// 3. A recorded entry with the same version and a file still on disk is
    ///    a hit.
    /// 4. Anything else downloads to a fresh path and records it. A failed
    ///    download leaves the index as it was.
    ///
    /// If `cancel` fires before the index write, nothing is recorded and the
    /// downloaded file is removed.
    #[tracing::instrument(skip_all, fields(slot = slot_key, version = definition.version))]
    pub async fn resolve_cancellable(
        &self,
        slot_key: &str,
        definition: &Definition,
        cancel: &CancellationToken,
    ) -> Resolution {
        if !definition.active {
            return Resolution::Absent;
        }

        if !AssetFetcher::is_cacheable(&definition.locator) {
            tracing::debug!(locator = %definition.locator, "pass-through locator");
            return Resolution::Ready(Asset::new(
                definition,
                ResolvedPath::Remote(definition.locator.clone()),
            ));
        }

        let lock = self.slot_lock(slot_key).await;
        let result = {
            let _guard = lock.lock().await;
            self.materialize(definition, cancel).await
        };
        self.release_slot_lock(slot_key, lock).await;

        match result {
            Ok(path) => Resolution::Ready(Asset::new(definition, ResolvedPath::Local(path))),
            Err(error) => {
                if matches!(error, FetchError::Cancelled) {
                    tracing::debug!("materialization cancelled");
                } else {
                    tracing::warn!(error = %error, "failed to materialize asset");
                }
                Resolution::Failed {
                    definition: definition.clone(),
                    error,
                }
            }
        }
    }

    async fn materialize(
        &self,
        definition: &Definition,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        self.store.ensure_directory_async().await;
        let mut index = self.store.load_async().await;
        let key = self.store.key_for(&definition.id);

        if let Some(entry) = index.get(&key) {
            if entry.version == definition.version {
                if tokio::fs::try_exists(&entry.local_path).await.unwrap_or(false) {
                    tracing::debug!(path = %entry.local_path.display(), "cache hit");
                    return Ok(entry.local_path.clone());
                }
                tracing::info!(
                    path = %entry.local_path.display(),
                    "cached file is gone, fetching again"
                );
            } else {
                tracing::info!(cached = entry.version, "cached version is stale");
            }
        }

        let destination = AssetFetcher::destination_for(self.store.asset_dir(), definition);
        let downloaded = self
            .fetcher
            .download_cancellable(&definition.locator, &destination, cancel)
            .await?;

        if cancel.is_cancelled() {
            remove_quietly(&destination).await;
            return Err(FetchError::Cancelled);
        }

        index.insert(
            key,
            CacheEntry {
                slot_id: definition.id.clone(),
                version: definition.version,
                local_path: destination.clone(),
                fetched_at: Utc::now(),
                size_bytes: downloaded.size_bytes,
                sha256: downloaded.sha256,
            },
        );
        self.store.save_async(index).await;
        tracing::info!(path = %destination.display(), "cached asset");

        if self.sweep_superseded {
            self.sweep(&definition.id, &destination).await;
        }

        Ok(destination)
    }

    /// Deletes every cached file of `slot_id` other than `keep`.
    async fn sweep(&self, slot_id: &str, keep: &Path) {
        let dir = self.store.asset_dir();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "cannot list cache directory");
                return;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "cannot list cache directory");
                    break;
                }
            };

            let path = entry.path();
            let superseded = entry
                .file_name()
                .to_str()
                .and_then(|name| version_in_file_name(name, slot_id))
                .is_some();
            if superseded && path != keep {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => tracing::debug!(path = %path.display(), "removed superseded asset"),
                    Err(e) => tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to remove superseded asset"
                    ),
                }
            }
        }
    }

    async fn slot_lock(&self, slot_key: &str) -> Arc<Mutex<()>> {
        let mut in_flight = self.in_flight.lock().await;
        Arc::clone(
            in_flight
                .entry(slot_key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    async fn release_slot_lock(&self, slot_key: &str, lock: Arc<Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().await;
        // Only the map and this caller hold it: nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            in_flight.remove(slot_key);
        }
    }

    #[cfg(test)]
    async fn in_flight_len(&self) -> usize {
        self.in_flight.lock().await.len()
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove cancelled download");
    }
}
