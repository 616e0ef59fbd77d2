//! Versioned local cache for remotely defined advertisement slots.
//!
//! A slot is described by a remote [`Definition`] that can change at any
//! time. This crate keeps a byte-complete local copy of the asset each
//! definition points at, re-fetching only when the definition's version
//! changes or the cached file disappears.
//!
//! # Features
//!
//! - **Live invalidation** via [`DefinitionWatcher`] subscriptions
//! - **Single-flight** materialization per slot, so duplicate pushes download once
//! - **Fail-soft index** that self-heals from corruption
//! - **Pass-through** for external URLs that never touch local storage
//! - **Cancellation** of unrecorded fetches when a subscription ends
//! - **Superseded-version sweep** after each cache fill
//!
//! # Layout on disk
//!
//! ```text
//! {cache_root}/
//! ├── slot-assets/
//! │   ├── home_banner_v1.png
//! │   └── home_banner_v2.png      (v1 swept after v2 is recorded)
//! └── slot-assets-meta.json       { "ad_home_banner": { "version": 2, ... } }
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use adslot_cache::{
//!     CacheConfig, HttpBlobStore, MemoryDefinitionStore, SlotService, TracingSink,
//! };
//!
//! # async fn run() -> adslot_cache::Result<()> {
//! let config = CacheConfig::new("/var/cache/app");
//! let blobs = HttpBlobStore::new(&config.blob_base_url, config.request_timeout())?;
//! let service = SlotService::new(
//!     &config,
//!     Arc::new(MemoryDefinitionStore::new()),
//!     Arc::new(blobs),
//!     Arc::new(TracingSink),
//! );
//!
//! let mut watch = service.watch("home_banner");
//! while let Some(resolution) = watch.next().await {
//!     match resolution.asset() {
//!         Some(asset) => println!("showing {}", asset.resolved),
//!         None => println!("no advertisement"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod analytics;
pub mod config;
pub mod definition;
pub mod error;
pub mod fetch;
pub mod hash;
pub mod index;
pub mod materialize;
pub mod service;
pub mod watch;

pub use analytics::{AdEvent, AnalyticsSink, BroadcastSink, TracingSink};
pub use config::CacheConfig;
pub use definition::{Asset, AssetKind, Definition, Resolution, ResolvedPath};
pub use error::{ConfigError, FetchError, Result, StoreError};
pub use fetch::{AssetFetcher, BlobLocation, BlobStore, DirBlobStore, Downloaded, HttpBlobStore};
pub use index::{CacheEntry, CacheIndex, CacheStore};
pub use materialize::Materializer;
pub use service::SlotService;
pub use watch::{
    DefinitionStore, DefinitionWatcher, DocumentStream, MemoryDefinitionStore, SlotWatch,
    Subscription,
};
