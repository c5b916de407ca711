//! Domain types for filemirror.
//!
//! Content is identified by its [`NaturalKey`] (`path` + `digest`). Records are
//! immutable once created; a repository version only tracks which records it
//! contains.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StoreError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for a configured remote.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteName(pub String);

impl fmt::Display for RemoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RemoteName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RemoteName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed name for a local repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryName(pub String);

impl fmt::Display for RepositoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RepositoryName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RepositoryName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a content record: SHA-256 hex of `path NUL digest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(pub String);

impl ContentId {
    /// Derive the identifier for a natural key. Equal keys always share an id.
    pub fn for_key(key: &NaturalKey) -> Self {
        let mut h = Sha256::new();
        h.update(key.path.as_bytes());
        h.update([0u8]);
        h.update(key.digest.as_bytes());
        Self(hex::encode(h.finalize()))
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Reject names that cannot safely be used as a single path component.
pub(crate) fn check_name(name: &str) -> Result<(), StoreError> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.starts_with('.') {
        "name must not start with '.'"
    } else if name.contains(['/', '\\']) {
        "name must not contain path separators"
    } else {
        return Ok(());
    };
    Err(StoreError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

// ---------------------------------------------------------------------------
// Content identity
// ---------------------------------------------------------------------------

/// The identity of a content unit. Size is metadata, not identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey {
    pub path: String,
    pub digest: String,
}

impl NaturalKey {
    pub fn new(path: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            digest: digest.into(),
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.path, self.digest)
    }
}

/// One record of a remote manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Relative, `/`-separated file path.
    pub path: String,
    /// Lower-case SHA-256 hex digest of the file.
    pub digest: String,
    pub size: u64,
}

impl ManifestEntry {
    pub fn key(&self) -> NaturalKey {
        NaturalKey::new(self.path.clone(), self.digest.clone())
    }
}

/// An immutable content record. Its single artifact is addressed by `digest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: ContentId,
    pub path: String,
    pub digest: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl ContentRecord {
    pub fn new(key: NaturalKey, size: u64) -> Self {
        Self {
            id: ContentId::for_key(&key),
            path: key.path,
            digest: key.digest,
            size,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> NaturalKey {
        NaturalKey::new(self.path.clone(), self.digest.clone())
    }
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

/// A sealed, immutable snapshot of a repository's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryVersion {
    pub repository: RepositoryName,
    /// Strictly increasing, starting at 1.
    pub number: u64,
    /// The version this one was derived from, `None` for an initial import.
    pub base: Option<u64>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub content: BTreeMap<ContentId, NaturalKey>,
}

impl RepositoryVersion {
    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &NaturalKey> + '_ {
        self.content.values()
    }
}

// ---------------------------------------------------------------------------
// Remote configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_DOWNLOAD_WORKERS: usize = 4;
pub const DEFAULT_RETRIES: u32 = 2;

fn default_mirror() -> bool {
    true
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_download_workers() -> usize {
    DEFAULT_DOWNLOAD_WORKERS
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

/// A remote file repository that can be mirrored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub name: RemoteName,
    /// URL of the remote manifest, e.g. `https://host/repo/PULP_MANIFEST`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Remove local content that is no longer listed remotely.
    #[serde(default = "default_mirror")]
    pub mirror: bool,
    /// Chunk size for removal lookups.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_download_workers")]
    pub download_workers: usize,
    #[serde(default = "default_retries")]
    pub retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Remote {
    pub fn new(name: RemoteName, url: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            name,
            url,
            mirror: default_mirror(),
            batch_size: DEFAULT_BATCH_SIZE,
            download_workers: DEFAULT_DOWNLOAD_WORKERS,
            retries: DEFAULT_RETRIES,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(RemoteName::from("iso").to_string(), "iso");
        assert_eq!(RepositoryName::from("mirror").to_string(), "mirror");
    }

    #[test]
    fn content_id_depends_on_path_and_digest() {
        let a = ContentId::for_key(&NaturalKey::new("a", "1"));
        assert_eq!(a, ContentId::for_key(&NaturalKey::new("a", "1")));
        assert_ne!(a, ContentId::for_key(&NaturalKey::new("a", "2")));
        assert_ne!(a, ContentId::for_key(&NaturalKey::new("b", "1")));
        assert_eq!(a.0.len(), 64);
    }

    #[test]
    fn content_id_separates_path_from_digest() {
        let left = ContentId::for_key(&NaturalKey::new("ab", "c"));
        let right = ContentId::for_key(&NaturalKey::new("a", "bc"));
        assert_ne!(left, right);
    }

    #[test]
    fn remote_yaml_fills_defaults() {
        let yaml = "name: iso\nurl: http://host/repo/PULP_MANIFEST\n\
                    created_at: 2024-01-01T00:00:00Z\nupdated_at: 2024-01-01T00:00:00Z\n";
        let remote: Remote = serde_yaml::from_str(yaml).expect("deserialize");
        assert!(remote.mirror);
        assert_eq!(remote.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(remote.download_workers, DEFAULT_DOWNLOAD_WORKERS);
        assert_eq!(remote.retries, DEFAULT_RETRIES);
    }

    #[test]
    fn version_json_roundtrip_keeps_members() {
        let key = NaturalKey::new("sub/file.iso", "abc");
        let mut content = BTreeMap::new();
        content.insert(ContentId::for_key(&key), key.clone());
        let version = RepositoryVersion {
            repository: RepositoryName::from("r"),
            number: 2,
            base: Some(1),
            created_at: Utc::now(),
            content,
        };
        let json = serde_json::to_string(&version).expect("serialize");
        let back: RepositoryVersion = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, version);
        assert_eq!(back.keys().collect::<Vec<_>>(), vec![&key]);
    }

    #[test]
    fn check_name_rejects_path_like_names() {
        assert!(check_name("mirror").is_ok());
        assert!(check_name("").is_err());
        assert!(check_name("..").is_err());
        assert!(check_name("a/b").is_err());
        assert!(check_name(".hidden").is_err());
    }
}
