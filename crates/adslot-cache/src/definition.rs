//! Slot definitions and the resolved values handed to consumers.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FetchError, StoreError};

/// How a consumer renders the asset. Opaque to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Video,
    Gif,
}

impl AssetKind {
    /// Lowercase label as it appears in definition documents.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Gif => "gif",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The remote, authoritative record for one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub id: String,
    pub kind: AssetKind,
    /// Blob-storage reference or arbitrary external URL.
    pub locator: String,
    pub active: bool,
    /// Compared for equality only; no ordering is assumed.
    pub version: i64,
    /// Click-through target, passed through untouched.
    pub link: String,
}

/// Wire shape of a definition document: `type|url|link|active|version`.
#[derive(Debug, Deserialize)]
struct DefinitionDocument {
    #[serde(rename = "type")]
    kind: AssetKind,
    url: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    active: bool,
    version: i64,
}

impl Definition {
    /// Decodes a document from the remote store.
    ///
    /// Returns `Ok(None)` when the document is inactive. Inactive documents
    /// are not decoded further, so they may omit every other field.
    pub fn from_document(id: &str, data: &Value) -> Result<Option<Self>, StoreError> {
        let active = data.get("active").and_then(Value::as_bool).unwrap_or(false);
        if !active {
            return Ok(None);
        }

        let doc: DefinitionDocument =
            serde_json::from_value(data.clone()).map_err(|source| StoreError::Decode {
                id: id.to_string(),
                source,
            })?;

        Ok(Some(Self {
            id: id.to_string(),
            kind: doc.kind,
            locator: doc.url,
            active: doc.active,
            version: doc.version,
            link: doc.link,
        }))
    }
}

/// Where a resolved asset's bytes can be read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "location", rename_all = "snake_case")]
pub enum ResolvedPath {
    /// A byte-complete copy in the local cache.
    Local(PathBuf),
    /// A pass-through locator served straight from its remote address.
    Remote(String),
}

impl ResolvedPath {
    /// Local file path, if the asset is cached on disk.
    #[must_use]
    pub fn local(&self) -> Option<&Path> {
        match self {
            Self::Local(path) => Some(path),
            Self::Remote(_) => None,
        }
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => f.write_str(url),
        }
    }
}

/// A definition whose asset is ready to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub kind: AssetKind,
    pub locator: String,
    pub link: String,
    pub version: i64,
    pub resolved: ResolvedPath,
}

impl Asset {
    pub(crate) fn new(definition: &Definition, resolved: ResolvedPath) -> Self {
        Self {
            id: definition.id.clone(),
            kind: definition.kind,
            locator: definition.locator.clone(),
            link: definition.link.clone(),
            version: definition.version,
            resolved,
        }
    }
}

/// Outcome of resolving a slot.
///
/// Every expected condition maps to a variant; consumers render
/// `Absent` and `Failed` as the empty placeholder.
#[derive(Debug)]
pub enum Resolution {
    /// No document, or the definition is inactive.
    Absent,
    /// The asset is available at [`Asset::resolved`].
    Ready(Asset),
    /// The definition is active but its asset could not be materialized.
    Failed {
        definition: Definition,
        error: FetchError,
    },
}

impl Resolution {
    /// The ready asset, if any.
    #[must_use]
    pub fn asset(&self) -> Option<&Asset> {
        match self {
            Self::Ready(asset) => Some(asset),
            Self::Absent | Self::Failed { .. } => None,
        }
    }

    /// Consumes the resolution, keeping only a ready asset.
    #[must_use]
    pub fn into_asset(self) -> Option<Asset> {
        match self {
            Self::Ready(asset) => Some(asset),
            Self::Absent | Self::Failed { .. } => None,
        }
    }

    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}
