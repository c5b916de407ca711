//! filemirror core library: domain types, remote registry, content store, errors.
//!
//! Public API surface:
//! - [`types`]: natural keys, manifest entries, content records, versions
//! - [`error`]: [`StoreError`]
//! - [`remotes`]: load / save / add remote definitions
//! - [`store`]: durable artifact, content and repository-version store

pub mod error;
pub mod remotes;
pub mod store;
pub mod types;

pub use error::StoreError;
pub use store::{ProvisionalVersion, Store};
pub use types::{
    ContentId, ContentRecord, ManifestEntry, NaturalKey, Remote, RemoteName, RepositoryName,
    RepositoryVersion,
};
