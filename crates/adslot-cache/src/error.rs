//! Error types for the slot cache.
//!
//! None of these cross the subscription boundary: the materializer folds
//! them into a [`Resolution`](crate::Resolution) so consumers only ever see
//! "absent", "ready" or "failed".

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while fetching and storing an asset.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FetchError {
    /// The locator could not be split into bucket and object path.
    #[error("malformed locator {locator:?}: {reason}")]
    MalformedLocator {
        /// Locator as received in the definition.
        locator: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// The locator does not use the blob-storage scheme.
    #[error("locator is not cacheable: {0}")]
    NotCacheable(String),

    /// Transport-level failure talking to the blob store.
    #[error("network error: {0}")]
    Network(String),

    /// The blob store answered with a non-success status.
    #[error("blob request for {url} failed with status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// Local file operation failed.
    #[error("failed to {operation} {path}")]
    Io {
        /// Short verb describing the operation ("write", "rename", ...).
        operation: &'static str,
        /// Path being operated on.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The owning subscription went away before the fetch was committed.
    #[error("materialization cancelled")]
    Cancelled,
}

impl FetchError {
    pub(crate) fn io(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Returns a user-friendly message suitable for a transient error banner.
    #[must_use]
    pub fn user_message(&self) -> &str {
        match self {
            Self::MalformedLocator { .. } | Self::NotCacheable(_) => {
                "This advertisement is misconfigured."
            }
            Self::Network(_) | Self::Status { .. } => {
                "Could not load the advertisement. Please check your internet connection."
            }
            Self::Io { .. } => "Could not store the advertisement on this device.",
            Self::Cancelled => "Loading was interrupted.",
        }
    }

    /// Returns whether a later push could plausibly succeed where this one failed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Io { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::MalformedLocator { .. } | Self::NotCacheable(_) | Self::Cancelled => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// Errors raised by a remote definition store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The store is not initialized or cannot be reached.
    #[error("definition store unavailable: {0}")]
    Unavailable(String),

    /// A document exists but does not describe a valid definition.
    #[error("invalid definition document {id}")]
    Decode {
        /// Document id.
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Returns a user-friendly message for this error.
    #[must_use]
    pub fn user_message(&self) -> &str {
        match self {
            Self::Unavailable(_) => "Advertisements are currently unavailable.",
            Self::Decode { .. } => "This advertisement is misconfigured.",
        }
    }
}

/// Errors raised while loading a [`CacheConfig`](crate::CacheConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}")]
    Read {
        /// Config file path.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for [`CacheConfig`](crate::CacheConfig).
    #[error("failed to parse config file {path}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type alias for fetch operations.
pub type Result<T> = std::result::Result<T, FetchError>;
