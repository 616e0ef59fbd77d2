//! Cache fill, hit and invalidation through the public materializer API.

mod common;

use std::sync::Arc;

use adslot_cache::{CacheConfig, FetchError, Materializer, Resolution, ResolvedPath};
use common::{CountingBlobStore, GatedBlobStore, LOCATOR, SLOT, asset_file, definition};
use tokio_util::sync::CancellationToken;

fn materializer(cache: &tempfile::TempDir, blobs: Arc<CountingBlobStore>) -> Materializer {
    Materializer::new(&CacheConfig::new(cache.path()), blobs)
}

fn local_path(resolution: Resolution) -> std::path::PathBuf {
    resolution
        .into_asset()
        .and_then(|asset| asset.resolved.local().map(ToOwned::to_owned))
        .expect("expected a local asset")
}

#[tokio::test]
async fn repeated_resolve_is_a_hit() {
    let cache = tempfile::tempdir().unwrap();
    let blobs = Arc::new(CountingBlobStore::new().with_object(LOCATOR, b"banner"));
    let materializer = materializer(&cache, blobs.clone());
    let def = definition(1, LOCATOR);

    let first = local_path(materializer.resolve(SLOT, &def).await);
    let second = local_path(materializer.resolve(SLOT, &def).await);
    let third = local_path(materializer.resolve(SLOT, &def).await);

    assert_eq!(first, asset_file(cache.path(), "home_banner_v1.png"));
    assert_eq!(first, second);
    assert_eq!(second, third);
    assert_eq!(blobs.fetches(), 1);
    assert_eq!(std::fs::read(&first).unwrap(), b"banner");
}

#[tokio::test]
async fn version_change_refetches_and_sweeps() {
    let cache = tempfile::tempdir().unwrap();
    let blobs = Arc::new(
        CountingBlobStore::new()
            .with_object(LOCATOR, b"one")
            .with_object("gs://bucket/b.jpg", b"two"),
    );
    let materializer = materializer(&cache, blobs.clone());

    let v1 = local_path(materializer.resolve(SLOT, &definition(1, LOCATOR)).await);
    let v2 = local_path(
        materializer
            .resolve(SLOT, &definition(2, "gs://bucket/b.jpg"))
            .await,
    );

    assert_eq!(blobs.fetches(), 2);
    assert_eq!(v2, asset_file(cache.path(), "home_banner_v2.jpg"));
    assert!(!v1.exists());

    let entry = materializer.store().lookup(SLOT).unwrap();
    assert_eq!(entry.version, 2);
    assert_eq!(entry.local_path, v2);
    assert_eq!(entry.size_bytes, 3);
    assert!(materializer.store().verify(&entry).unwrap());
}

#[tokio::test]
async fn sweep_can_be_disabled() {
    let cache = tempfile::tempdir().unwrap();
    let blobs = Arc::new(CountingBlobStore::new().with_object(LOCATOR, b"bytes"));
    let config = CacheConfig::new(cache.path()).with_sweep_superseded(false);
    let materializer = Materializer::new(&config, blobs);

    let v1 = local_path(materializer.resolve(SLOT, &definition(1, LOCATOR)).await);
    let v2 = local_path(materializer.resolve(SLOT, &definition(2, LOCATOR)).await);

    assert!(v1.exists());
    assert!(v2.exists());
}

#[tokio::test]
async fn sweep_leaves_other_slots_alone() {
    let cache = tempfile::tempdir().unwrap();
    let blobs = Arc::new(CountingBlobStore::new().with_object(LOCATOR, b"bytes"));
    let materializer = materializer(&cache, blobs);

    let mut other = definition(1, LOCATOR);
    other.id = "home_banner_wide".to_string();
    let other_path = local_path(materializer.resolve("home_banner_wide", &other).await);

    materializer.resolve(SLOT, &definition(1, LOCATOR)).await;
    materializer.resolve(SLOT, &definition(2, LOCATOR)).await;

    assert!(other_path.exists());
}

#[tokio::test]
async fn inactive_wins_over_cached_entry() {
    let cache = tempfile::tempdir().unwrap();
    let blobs = Arc::new(CountingBlobStore::new().with_object(LOCATOR, b"bytes"));
    let materializer = materializer(&cache, blobs.clone());
    let mut def = definition(1, LOCATOR);
    materializer.resolve(SLOT, &def).await;

    def.active = false;
    assert!(materializer.resolve(SLOT, &def).await.is_absent());
    assert_eq!(blobs.fetches(), 1);
    assert!(materializer.store().lookup(SLOT).unwrap().file_exists());
}

#[tokio::test]
async fn external_locator_passes_through() {
    let cache = tempfile::tempdir().unwrap();
    let blobs = Arc::new(CountingBlobStore::new());
    let materializer = materializer(&cache, blobs.clone());
    let locator = "https://cdn.example.com/banner.png";

    let asset = materializer
        .resolve(SLOT, &definition(3, locator))
        .await
        .into_asset()
        .unwrap();

    assert_eq!(asset.resolved, ResolvedPath::Remote(locator.to_string()));
    assert_eq!(asset.version, 3);
    assert_eq!(blobs.fetches(), 0);
    assert!(!materializer.store().index_path().exists());
}

#[tokio::test]
async fn missing_file_is_fetched_again() {
    let cache = tempfile::tempdir().unwrap();
    let blobs = Arc::new(CountingBlobStore::new().with_object(LOCATOR, b"bytes"));
    let materializer = materializer(&cache, blobs.clone());
    let def = definition(1, LOCATOR);

    let path = local_path(materializer.resolve(SLOT, &def).await);
    std::fs::remove_file(&path).unwrap();

    let again = local_path(materializer.resolve(SLOT, &def).await);
    assert_eq!(again, path);
    assert!(again.exists());
    assert_eq!(blobs.fetches(), 2);
}

#[tokio::test]
async fn failed_fetch_leaves_no_file() {
    let cache = tempfile::tempdir().unwrap();
    let blobs = Arc::new(CountingBlobStore::new());
    let materializer = materializer(&cache, blobs);

    let resolution = materializer.resolve(SLOT, &definition(1, LOCATOR)).await;
    assert!(matches!(
        resolution,
        Resolution::Failed {
            error: FetchError::Status { status: 404, .. },
            ..
        }
    ));

    let leftovers = std::fs::read_dir(cache.path().join("slot-assets"))
        .unwrap()
        .count();
    assert_eq!(leftovers, 0);
    assert!(materializer.store().lookup(SLOT).is_none());
}

#[tokio::test]
async fn malformed_blob_locator_fails() {
    let cache = tempfile::tempdir().unwrap();
    let blobs = Arc::new(CountingBlobStore::new());
    let materializer = materializer(&cache, blobs.clone());

    let resolution = materializer.resolve(SLOT, &definition(1, "gs://bucket")).await;
    assert!(matches!(
        resolution,
        Resolution::Failed {
            error: FetchError::MalformedLocator { .. },
            ..
        }
    ));
    assert_eq!(blobs.fetches(), 0);
}

#[tokio::test]
async fn corrupt_index_heals_on_next_fill() {
    let cache = tempfile::tempdir().unwrap();
    let blobs = Arc::new(CountingBlobStore::new().with_object(LOCATOR, b"bytes"));
    let materializer = materializer(&cache, blobs.clone());
    std::fs::write(cache.path().join("slot-assets-meta.json"), "{ not json").unwrap();

    let path = local_path(materializer.resolve(SLOT, &definition(1, LOCATOR)).await);

    assert_eq!(blobs.fetches(), 1);
    let entry = materializer.store().lookup(SLOT).unwrap();
    assert_eq!(entry.local_path, path);
}

#[tokio::test]
async fn minimal_index_entry_is_a_hit() {
    let cache = tempfile::tempdir().unwrap();
    let blobs = Arc::new(CountingBlobStore::new().with_object(LOCATOR, b"bytes"));
    let materializer = materializer(&cache, blobs.clone());
    let existing = asset_file(cache.path(), "home_banner_v1.png");
    std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
    std::fs::write(&existing, b"bytes").unwrap();
    let index = serde_json::json!({
        "ad_home_banner": { "version": 1, "localPath": existing }
    });
    std::fs::write(cache.path().join("slot-assets-meta.json"), index.to_string()).unwrap();

    let path = local_path(materializer.resolve(SLOT, &definition(1, LOCATOR)).await);

    assert_eq!(path, existing);
    assert_eq!(blobs.fetches(), 0);
}

#[tokio::test]
async fn concurrent_duplicate_pushes_download_once() {
    let cache = tempfile::tempdir().unwrap();
    let blobs = Arc::new(GatedBlobStore::new(
        CountingBlobStore::new().with_object(LOCATOR, b"bytes"),
    ));
    let materializer = Materializer::new(&CacheConfig::new(cache.path()), blobs.clone());
    let def = definition(1, LOCATOR);

    let (first, second, ()) = tokio::join!(
        materializer.resolve(SLOT, &def),
        materializer.resolve(SLOT, &def),
        async {
            blobs.wait_started().await;
            blobs.release(2);
        }
    );

    assert_eq!(local_path(first), local_path(second));
    assert_eq!(blobs.fetches(), 1);
}

#[tokio::test]
async fn cancelled_download_records_nothing() {
    let cache = tempfile::tempdir().unwrap();
    let blobs = Arc::new(GatedBlobStore::new(
        CountingBlobStore::new().with_object(LOCATOR, b"bytes"),
    ));
    let materializer = Materializer::new(&CacheConfig::new(cache.path()), blobs.clone());
    let cancel = CancellationToken::new();
    let def = definition(1, LOCATOR);

    let (resolution, ()) = tokio::join!(
        materializer.resolve_cancellable(SLOT, &def, &cancel),
        async {
            blobs.wait_started().await;
            cancel.cancel();
        }
    );

    assert!(matches!(
        resolution,
        Resolution::Failed {
            error: FetchError::Cancelled,
            ..
        }
    ));
    assert!(materializer.store().lookup(SLOT).is_none());
    assert!(!asset_file(cache.path(), "home_banner_v1.png").exists());
}
