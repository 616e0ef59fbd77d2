//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use adslot_cache::{
    AssetKind, BlobLocation, BlobStore, BroadcastSink, CacheConfig, Definition, FetchError,
    MemoryDefinitionStore, Resolution, SlotService, SlotWatch,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Notify, Semaphore};

pub const SLOT: &str = "home_banner";
pub const LOCATOR: &str = "gs://bucket/a.png";

/// In-memory blob store that counts every request.
#[derive(Default)]
pub struct CountingBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fetches: AtomicUsize,
}

impl CountingBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, locator: &str, bytes: &[u8]) -> Self {
        self.put(locator, bytes);
        self
    }

    pub fn put(&self, locator: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(locator.to_string(), bytes.to_vec());
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for CountingBlobStore {
    async fn get_bytes(&self, location: &BlobLocation) -> adslot_cache::Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let locator = format!("gs://{}/{}", location.bucket, location.path);
        self.objects
            .lock()
            .unwrap()
            .get(&locator)
            .cloned()
            .ok_or(FetchError::Status {
                status: 404,
                url: locator,
            })
    }
}

/// Blob store whose requests block until released.
pub struct GatedBlobStore {
    inner: CountingBlobStore,
    gate: Semaphore,
    started: Notify,
}

impl GatedBlobStore {
    pub fn new(inner: CountingBlobStore) -> Self {
        Self {
            inner,
            gate: Semaphore::new(0),
            started: Notify::new(),
        }
    }

    pub fn release(&self, requests: usize) {
        self.gate.add_permits(requests);
    }

    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    pub fn fetches(&self) -> usize {
        self.inner.fetches()
    }
}

#[async_trait]
impl BlobStore for GatedBlobStore {
    async fn get_bytes(&self, location: &BlobLocation) -> adslot_cache::Result<Vec<u8>> {
        self.started.notify_one();
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        permit.forget();
        self.inner.get_bytes(location).await
    }
}

pub fn definition(version: i64, locator: &str) -> Definition {
    Definition {
        id: SLOT.to_string(),
        kind: AssetKind::Image,
        locator: locator.to_string(),
        active: true,
        version,
        link: "https://example.com/promo".to_string(),
    }
}

pub fn document(version: i64, locator: &str) -> Value {
    json!({
        "type": "image",
        "url": locator,
        "link": "https://example.com/promo",
        "active": true,
        "version": version
    })
}

pub fn asset_file(cache_root: &Path, name: &str) -> std::path::PathBuf {
    cache_root.join("slot-assets").join(name)
}

/// Service over an in-memory definition store.
pub struct Harness<B = CountingBlobStore> {
    pub definitions: MemoryDefinitionStore,
    pub blobs: Arc<B>,
    pub analytics: BroadcastSink,
    pub service: SlotService,
    pub cache: tempfile::TempDir,
}

impl<B: BlobStore + 'static> Harness<B> {
    pub fn new(blobs: B) -> Self {
        let cache = tempfile::tempdir().unwrap();
        let definitions = MemoryDefinitionStore::new();
        let blobs = Arc::new(blobs);
        let analytics = BroadcastSink::new(16);
        let service = SlotService::new(
            &CacheConfig::new(cache.path()),
            Arc::new(definitions.clone()),
            blobs.clone(),
            Arc::new(analytics.clone()),
        );
        Self {
            definitions,
            blobs,
            analytics,
            service,
            cache,
        }
    }
}

/// Files left in the asset directory, which may not exist yet.
pub fn asset_files(cache_root: &Path) -> Vec<std::path::PathBuf> {
    match std::fs::read_dir(cache_root.join("slot-assets")) {
        Ok(entries) => entries.map(|entry| entry.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}

/// Next resolution, failing the test if none arrives in time.
pub async fn next_resolution(watch: &mut SlotWatch) -> Option<Resolution> {
    tokio::time::timeout(Duration::from_secs(5), watch.next())
        .await
        .expect("timed out waiting for a resolution")
}
