// Error taxonomy for the fetch-normalize pipeline.
//
// One enum per failure domain so callers can react per layer: storage
// problems are recoverable by retrying later, bootstrap failures need a
// human-triggered recapture, transport failures are final for a single
// request and get collected at the fan-out boundary.

use std::path::PathBuf;

use thiserror::Error;

use crate::translate::SourceId;

/// Failures touching the on-disk bootstrap cache.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("no per-user cache directory available on this platform")]
    NoCacheDir,

    #[error("cache root {path:?} is not usable: {source}")]
    CacheRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read template {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write template {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template {path:?} is not valid JSON: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode template for '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The one-shot interactive capture did not produce a usable template.
///
/// Fatal for the invocation; the remedy is an operator-triggered
/// force-refresh, never an automatic retry through the same path.
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("no matching search request observed for '{key}' within {timeout_secs}s")]
    NoRequestObserved { key: String, timeout_secs: u64 },

    #[error("browser session failed: {0}")]
    Browser(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A single HTTP exchange failed for good.
///
/// Transient conditions (timeouts, 5xx, 429) are retried inside the
/// transport and only surface here once the attempt budget is spent.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("{method} {url} rejected with status {status}")]
    Status {
        method: String,
        url: String,
        status: u16,
    },

    #[error("request could not be constructed: {0}")]
    InvalidRequest(String),

    #[error("{method} {url} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        method: String,
        url: String,
        attempts: u32,
        last: String,
    },
}

impl TransportError {
    /// Status code carried by a `Status` rejection, if that is what this is.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Umbrella error for a single query against one source adapter.
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("unexpected response payload from {source_id}: {detail}")]
    Payload { source_id: SourceId, detail: String },
}
