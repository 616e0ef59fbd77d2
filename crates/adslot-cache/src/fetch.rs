//! Asset retrieval from blob storage.
//!
//! Only `gs://bucket/path` locators are cacheable. Anything else is
//! pass-through and never reaches this module's download path.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::{HeaderValue, USER_AGENT};
use tokio_util::sync::CancellationToken;

use crate::definition::Definition;
use crate::error::{FetchError, Result};
use crate::hash::digest_bytes;

/// Scheme prefix of cacheable blob-storage locators.
pub const BLOB_SCHEME: &str = "gs://";

/// Extension used when the locator does not carry a usable one.
const FALLBACK_EXTENSION: &str = "bin";

const MAX_EXTENSION_LEN: usize = 8;

const USER_AGENT_VALUE: &str = concat!("adslot-cache/", env!("CARGO_PKG_VERSION"));

/// A parsed `gs://bucket/path` locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLocation {
    pub bucket: String,
    pub path: String,
}

impl BlobLocation {
    /// Parses a blob-storage locator.
    pub fn parse(locator: &str) -> Result<Self> {
        let malformed = |reason| FetchError::MalformedLocator {
            locator: locator.to_string(),
            reason,
        };

        let rest = locator
            .strip_prefix(BLOB_SCHEME)
            .ok_or_else(|| FetchError::NotCacheable(locator.to_string()))?;
        let (bucket, path) = rest
            .split_once('/')
            .ok_or_else(|| malformed("missing object path"))?;

        if bucket.is_empty() {
            return Err(malformed("missing bucket"));
        }
        if path.is_empty() {
            return Err(malformed("missing object path"));
        }
        if path.split('/').any(|segment| segment == "..") {
            return Err(malformed("object path escapes the bucket"));
        }

        Ok(Self {
            bucket: bucket.to_string(),
            path: path.to_string(),
        })
    }
}

/// Remote store holding asset bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Retrieves the full payload of one object.
    async fn get_bytes(&self, location: &BlobLocation) -> Result<Vec<u8>>;
}

/// Blob store reached over HTTP, e.g. the public storage endpoint.
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpBlobStore {
    /// Creates a store that maps `gs://bucket/path` to `{base_url}/bucket/path`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|_| FetchError::MalformedLocator {
            locator: base_url.to_string(),
            reason: "invalid base URL",
        })?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    /// HTTP URL an object is served from.
    pub fn object_url(&self, location: &BlobLocation) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| FetchError::MalformedLocator {
                locator: self.base_url.to_string(),
                reason: "base URL cannot carry a path",
            })?
            .pop_if_empty()
            .push(&location.bucket)
            .extend(location.path.split('/'));
        Ok(url)
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn get_bytes(&self, location: &BlobLocation) -> Result<Vec<u8>> {
        let url = self.object_url(location)?;
        tracing::debug!(%url, "requesting blob");

        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Blob store backed by a local directory laid out as `{root}/{bucket}/{path}`.
#[derive(Debug, Clone)]
pub struct DirBlobStore {
    root: PathBuf,
}

impl DirBlobStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, location: &BlobLocation) -> PathBuf {
        let mut path = self.root.join(&location.bucket);
        path.extend(location.path.split('/').filter(|s| !s.is_empty()));
        path
    }
}

#[async_trait]
impl BlobStore for DirBlobStore {
    async fn get_bytes(&self, location: &BlobLocation) -> Result<Vec<u8>> {
        let path = self.object_path(location);
        tokio::fs::read(&path)
            .await
            .map_err(|e| FetchError::io("read", path, e))
    }
}

/// Size and digest of a completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    pub size_bytes: u64,
    pub sha256: String,
}

/// Moves asset bytes from a [`BlobStore`] into the cache directory.
#[derive(Clone)]
pub struct AssetFetcher {
    blobs: Arc<dyn BlobStore>,
}

impl std::fmt::Debug for AssetFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetFetcher").finish_non_exhaustive()
    }
}

impl AssetFetcher {
    #[must_use]
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Whether a locator goes through the cache. Everything that is not a
    /// blob-storage reference is served as-is.
    #[must_use]
    pub fn is_cacheable(locator: &str) -> bool {
        locator.starts_with(BLOB_SCHEME)
    }

    /// Cache file for a definition: `{id}_v{version}.{ext}` inside `dir`.
    #[must_use]
    pub fn destination_for(dir: &Path, definition: &Definition) -> PathBuf {
        dir.join(format!(
            "{}_v{}.{}",
            file_stem(&definition.id),
            definition.version,
            extension_of(&definition.locator)
        ))
    }

    /// Downloads `locator` into `destination`.
    pub async fn download(&self, locator: &str, destination: &Path) -> Result<Downloaded> {
        self.download_cancellable(locator, destination, &CancellationToken::new())
            .await
    }

    /// Downloads `locator` into `destination` unless `cancel` fires first.
    ///
    /// The destination is written through a temp file in the same directory
    /// and renamed into place, so it either holds the complete payload or
    /// does not exist. Cancellation is honored up to the start of the write.
    pub async fn download_cancellable(
        &self,
        locator: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<Downloaded> {
        let location = BlobLocation::parse(locator)?;

        let bytes = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(FetchError::Cancelled),
            bytes = self.blobs.get_bytes(&location) => bytes?,
        };
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let destination = destination.to_path_buf();
        let written = tokio::task::spawn_blocking(move || write_atomically(&destination, &bytes))
            .await
            .map_err(|e| FetchError::io("join write task for", locator, std::io::Error::other(e)))??;

        tracing::debug!(
            locator,
            size_bytes = written.size_bytes,
            "downloaded asset"
        );
        Ok(written)
    }
}

fn write_atomically(destination: &Path, bytes: &[u8]) -> Result<Downloaded> {
    let parent = destination.parent().ok_or_else(|| {
        FetchError::io(
            "locate parent of",
            destination,
            std::io::Error::other("destination has no parent directory"),
        )
    })?;
    std::fs::create_dir_all(parent).map_err(|e| FetchError::io("create directory", parent, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| FetchError::io("create temp file in", parent, e))?;
    tmp.write_all(bytes)
        .map_err(|e| FetchError::io("write", tmp.path().to_path_buf(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| FetchError::io("sync", tmp.path().to_path_buf(), e))?;
    tmp.persist(destination)
        .map_err(|e| FetchError::io("rename", destination, e.error))?;

    Ok(Downloaded {
        size_bytes: bytes.len() as u64,
        sha256: digest_bytes(bytes),
    })
}

/// File-name-safe form of a slot id.
#[must_use]
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// File name prefix for a slot id.
///
/// Ids that are already file-name safe are used verbatim; others are
/// sanitized and suffixed with a short digest of the original id so that
/// distinct ids never share files. A safe id that itself ends like a digest
/// suffix is suffixed too, so a verbatim stem never ends in one.
#[must_use]
pub fn file_stem(id: &str) -> String {
    let sanitized = sanitize_id(id);
    if sanitized == id && !has_digest_suffix(id) {
        sanitized
    } else {
        format!("{sanitized}-{}", &digest_bytes(id.as_bytes())[..8])
    }
}

/// Whether `stem` ends in `-` followed by eight lowercase hex digits.
fn has_digest_suffix(stem: &str) -> bool {
    let bytes = stem.as_bytes();
    let Some(start) = bytes.len().checked_sub(9) else {
        return false;
    };
    bytes[start] == b'-'
        && bytes[start + 1..]
            .iter()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b))
}

/// Extension of the locator's final path segment, without any query string.
#[must_use]
pub fn extension_of(locator: &str) -> &str {
    let without_query = locator.split(['?', '#']).next().unwrap_or(locator);
    let last_segment = without_query.rsplit('/').next().unwrap_or(without_query);

    match last_segment.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext
        }
        _ => FALLBACK_EXTENSION,
    }
}

/// Version encoded in a cache file name for `slot_id`, if the name is one.
#[must_use]
pub fn version_in_file_name(file_name: &str, slot_id: &str) -> Option<i64> {
    let rest = file_name.strip_prefix(&format!("{}_v", file_stem(slot_id)))?;
    let (version, ext) = rest.split_once('.')?;
    if ext.is_empty() || ext.contains('.') {
        return None;
    }
    version.parse().ok()
}
