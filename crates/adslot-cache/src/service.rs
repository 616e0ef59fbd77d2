//! Consumer-facing entry point.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::analytics::{AdEvent, AnalyticsSink};
use crate::config::CacheConfig;
use crate::definition::{Asset, Definition, Resolution};
use crate::fetch::BlobStore;
use crate::materialize::Materializer;
use crate::watch::{DefinitionStore, DefinitionWatcher, SlotWatch, Subscription};

/// Everything a slot consumer needs, wired once at startup.
///
/// All remote handles are passed in; nothing is initialized lazily or held
/// globally. [`shutdown`](Self::shutdown) ends every subscription and
/// cancels fetches that have not yet been recorded.
pub struct SlotService {
    definitions: Arc<dyn DefinitionStore>,
    materializer: Arc<Materializer>,
    watcher: DefinitionWatcher,
    analytics: Arc<dyn AnalyticsSink>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for SlotService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotService")
            .field("materializer", &self.materializer)
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SlotService {
    #[must_use]
    pub fn new(
        config: &CacheConfig,
        definitions: Arc<dyn DefinitionStore>,
        blobs: Arc<dyn BlobStore>,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let materializer = Arc::new(Materializer::new(config, blobs));
        let watcher = DefinitionWatcher::new(
            Arc::clone(&definitions),
            Arc::clone(&materializer),
            shutdown.clone(),
        );
        tracing::info!(
            cache_root = %config.cache_root.display(),
            "slot service ready"
        );
        Self {
            definitions,
            materializer,
            watcher,
            analytics,
            shutdown,
        }
    }

    #[must_use]
    pub fn materializer(&self) -> &Materializer {
        &self.materializer
    }

    /// Live subscription; see [`DefinitionWatcher::subscribe`].
    pub fn subscribe<F>(&self, slot_key: &str, callback: F) -> Subscription
    where
        F: Fn(Resolution) + Send + Sync + 'static,
    {
        self.watcher.subscribe(slot_key, callback)
    }

    /// Live subscription consumed as a queue.
    pub fn watch(&self, slot_key: &str) -> SlotWatch {
        self.watcher.watch(slot_key)
    }

    /// One-shot read of a slot for contexts without a subscription.
    ///
    /// Returns `None` for an absent or inactive slot, and for any failure,
    /// which is logged.
    pub async fn fetch_active_asset(&self, slot_key: &str) -> Option<Asset> {
        let data = match self.definitions.get(slot_key).await {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(slot = slot_key, error = %e, "cannot fetch slot definition");
                return None;
            }
        };

        let definition = match Definition::from_document(slot_key, &data) {
            Ok(definition) => definition?,
            Err(e) => {
                tracing::warn!(slot = slot_key, error = %e, "undecodable definition");
                return None;
            }
        };

        self.materializer
            .resolve_cancellable(slot_key, &definition, &self.shutdown)
            .await
            .into_asset()
    }

    /// Materializes every active slot, keeping those that resolved.
    pub async fn fetch_all_active_assets(&self) -> Vec<Asset> {
        let documents = match self.definitions.query_active().await {
            Ok(documents) => documents,
            Err(e) => {
                tracing::error!(error = %e, "cannot query active slots");
                return Vec::new();
            }
        };

        let mut assets = Vec::with_capacity(documents.len());
        for (id, data) in documents {
            let definition = match Definition::from_document(&id, &data) {
                Ok(Some(definition)) => definition,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(slot = %id, error = %e, "undecodable definition");
                    continue;
                }
            };
            if let Some(asset) = self
                .materializer
                .resolve_cancellable(&id, &definition, &self.shutdown)
                .await
                .into_asset()
            {
                assets.push(asset);
            }
        }
        assets
    }

    /// Cached file for a slot, whatever its version, if it is still on disk.
    /// Never touches the network.
    pub async fn cached_asset(&self, slot_id: &str) -> Option<PathBuf> {
        let store = self.materializer.store();
        let index = store.load_async().await;
        let entry = index.get(&store.key_for(slot_id))?;
        if tokio::fs::try_exists(&entry.local_path).await.unwrap_or(false) {
            Some(entry.local_path.clone())
        } else {
            None
        }
    }

    /// Records that `asset` was shown in `slot_key`.
    pub fn track_impression(&self, slot_key: &str, asset: &Asset, advertiser: Option<&str>) {
        self.analytics
            .record(AdEvent::impression(&asset.id, slot_key, advertiser));
    }

    /// Records a tap on `asset` in `slot_key`, using its click-through link.
    pub fn track_click(&self, slot_key: &str, asset: &Asset, advertiser: Option<&str>) {
        self.analytics
            .record(AdEvent::click(&asset.id, slot_key, &asset.link, advertiser));
    }

    /// Ends all subscriptions and cancels unrecorded fetches. Idempotent.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!("slot service shutting down");
        }
        self.shutdown.cancel();
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for SlotService {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
