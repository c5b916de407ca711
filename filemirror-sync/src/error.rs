//! Error types for filemirror-sync.

use std::path::PathBuf;

use thiserror::Error;

use filemirror_core::StoreError;

use crate::download::TransportError;
use crate::manifest::ManifestError;

/// All errors that can abort a sync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote has no source URL configured. Raised before any I/O.
    #[error("remote '{remote}' must have a URL specified to synchronize")]
    MissingSource { remote: String },

    #[error("invalid source URL '{url}': {reason}")]
    InvalidSource { url: String, reason: String },

    /// Manifest or artifact download failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Unparseable manifest record.
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// A manifest path that would escape the remote's base directory.
    #[error("path '{path}' escapes the repository root")]
    PathTraversal { path: String },

    /// Storage access error from the content/version store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// At least one planned addition or removal failed; nothing was committed.
    #[error("{failed} change(s) failed to apply, first: {first}")]
    ApplyFailed { failed: usize, first: String },

    #[error("worker pool error: {0}")]
    WorkerPool(String),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
