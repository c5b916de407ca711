//! Durable content and repository-version store.
//!
//! # Storage layout
//!
//! ```text
//! ~/.filemirror/
//!   repositories/<repo>/repository.yaml     marker, created by `create_repository`
//!   repositories/<repo>/versions/<n>.json   sealed version n
//!   repositories/<repo>/sync.lock           exclusive lock held by a provisional version
//!   content/<id[0..2]>/<id>.json            immutable content record
//!   artifacts/<sha[0..2]>/<sha256>          immutable artifact bytes
//! ```
//!
//! Content records and artifacts are append-only and invisible until a sealed
//! version references them. A version becomes visible in a single rename, so
//! readers see either the previous latest version or the new one.

use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{io_err, json_err, StoreError};
use crate::remotes::home;
use crate::types::{
    check_name, ContentId, ContentRecord, NaturalKey, RepositoryName, RepositoryVersion,
};

const MARKER: &str = "repository.yaml";
const LOCK: &str = "sync.lock";

/// Handle on the store rooted at `<home>/.filemirror`.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Store rooted at `<home>/.filemirror`. No I/O.
    pub fn open_at(home: &Path) -> Self {
        Self {
            root: home.join(".filemirror"),
        }
    }

    /// `open_at` convenience wrapper.
    pub fn open() -> Result<Self, StoreError> {
        Ok(Self::open_at(&home()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // -----------------------------------------------------------------------
    // Paths
    // -----------------------------------------------------------------------

    fn repository_dir(&self, name: &RepositoryName) -> PathBuf {
        self.root.join("repositories").join(&name.0)
    }

    fn versions_dir(&self, name: &RepositoryName) -> PathBuf {
        self.repository_dir(name).join("versions")
    }

    fn version_path(&self, name: &RepositoryName, number: u64) -> PathBuf {
        self.versions_dir(name).join(format!("{number}.json"))
    }

    /// Where the artifact with `sha256` lives once stored.
    pub fn artifact_path(&self, sha256: &str) -> PathBuf {
        self.root.join("artifacts").join(fanout(sha256)).join(sha256)
    }

    fn content_path(&self, id: &ContentId) -> PathBuf {
        self.root
            .join("content")
            .join(fanout(&id.0))
            .join(format!("{}.json", id.0))
    }

    // -----------------------------------------------------------------------
    // Repositories
    // -----------------------------------------------------------------------

    /// Create an empty repository. Returns `false` if it already existed.
    pub fn create_repository(&self, name: &RepositoryName) -> Result<bool, StoreError> {
        check_name(&name.0)?;
        let dir = self.versions_dir(name);
        let marker = self.repository_dir(name).join(MARKER);
        if marker.exists() {
            return Ok(false);
        }
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        let content = format!("name: {}\ncreated_at: {}\n", name.0, Utc::now().to_rfc3339());
        write_atomic(&marker, content.as_bytes())?;
        Ok(true)
    }

    pub fn repository_exists(&self, name: &RepositoryName) -> Result<bool, StoreError> {
        check_name(&name.0)?;
        Ok(self.repository_dir(name).join(MARKER).exists())
    }

    /// All repositories, sorted by name.
    pub fn list_repositories(&self) -> Result<Vec<RepositoryName>, StoreError> {
        let dir = self.root.join("repositories");
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut names: Vec<RepositoryName> = std::fs::read_dir(&dir)
            .map_err(|e| io_err(&dir, e))?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().join(MARKER).exists())
            .map(|e| RepositoryName::from(e.file_name().to_string_lossy().into_owned()))
            .collect();
        names.sort();
        Ok(names)
    }

    fn require_repository(&self, name: &RepositoryName) -> Result<(), StoreError> {
        if self.repository_exists(name)? {
            Ok(())
        } else {
            Err(StoreError::RepositoryNotFound {
                name: name.0.clone(),
            })
        }
    }

    // -----------------------------------------------------------------------
    // Versions
    // -----------------------------------------------------------------------

    /// Sealed version numbers in ascending order.
    pub fn version_numbers(&self, name: &RepositoryName) -> Result<Vec<u64>, StoreError> {
        self.require_repository(name)?;
        let dir = self.versions_dir(name);
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut numbers: Vec<u64> = std::fs::read_dir(&dir)
            .map_err(|e| io_err(&dir, e))?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let file_name = e.file_name();
                let stem = file_name.to_str()?.strip_suffix(".json")?;
                stem.parse().ok()
            })
            .collect();
        numbers.sort_unstable();
        Ok(numbers)
    }

    pub fn version(
        &self,
        name: &RepositoryName,
        number: u64,
    ) -> Result<RepositoryVersion, StoreError> {
        self.require_repository(name)?;
        let path = self.version_path(name, number);
        if !path.exists() {
            return Err(StoreError::VersionNotFound {
                repository: name.0.clone(),
                number,
            });
        }
        read_json(&path)
    }

    pub fn versions(&self, name: &RepositoryName) -> Result<Vec<RepositoryVersion>, StoreError> {
        self.version_numbers(name)?
            .into_iter()
            .map(|n| self.version(name, n))
            .collect()
    }

    /// The newest sealed version, or `None` before the first sync.
    pub fn latest(&self, name: &RepositoryName) -> Result<Option<RepositoryVersion>, StoreError> {
        match self.version_numbers(name)?.last() {
            Some(&n) => self.version(name, n).map(Some),
            None => Ok(None),
        }
    }

    /// Open a new version on top of the current latest one.
    ///
    /// Blocks until no other provisional version of `name` is open. The base
    /// version is read while holding the lock and cannot change until the
    /// returned handle is sealed, discarded or dropped.
    pub fn create_provisional(
        &self,
        name: &RepositoryName,
    ) -> Result<ProvisionalVersion, StoreError> {
        self.require_repository(name)?;
        let lock_path = self.repository_dir(name).join(LOCK);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| io_err(&lock_path, e))?;
        lock.lock_exclusive().map_err(|e| io_err(&lock_path, e))?;

        let base = self.latest(name)?;
        let number = base.as_ref().map_or(1, |v| v.number + 1);
        let content = base.as_ref().map(|v| v.content.clone()).unwrap_or_default();
        Ok(ProvisionalVersion {
            repository: name.clone(),
            number,
            base,
            content,
            _lock: lock,
        })
    }

    /// Publish a provisional version as the new latest version.
    pub fn seal(&self, provisional: ProvisionalVersion) -> Result<RepositoryVersion, StoreError> {
        let ProvisionalVersion {
            repository,
            number,
            base,
            content,
            _lock,
        } = provisional;
        let version = RepositoryVersion {
            repository,
            number,
            base: base.map(|v| v.number),
            created_at: Utc::now(),
            content,
        };
        let path = self.version_path(&version.repository, version.number);
        write_json(&path, &version)?;
        drop(_lock);
        Ok(version)
    }

    /// Abandon a provisional version. Nothing it collected becomes visible.
    pub fn discard(&self, provisional: ProvisionalVersion) {
        drop(provisional);
    }

    /// Identifiers of `version` members matching any of `keys`.
    ///
    /// One lookup per call, no matter how many keys; only identifiers are
    /// returned. Each matching member is returned once.
    pub fn find_content(
        &self,
        version: &RepositoryVersion,
        keys: &[NaturalKey],
    ) -> Vec<ContentId> {
        let mut seen = HashSet::new();
        keys.iter()
            .filter_map(|key| {
                let id = ContentId::for_key(key);
                match version.content.get(&id) {
                    Some(member) if member == key && seen.insert(id.clone()) => Some(id),
                    _ => None,
                }
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Artifacts and content records
    // -----------------------------------------------------------------------

    /// Copy `src` into the artifact store under `sha256`. Existing artifacts
    /// are left untouched. The caller is responsible for having verified the
    /// digest.
    pub fn put_artifact(&self, src: &Path, sha256: &str) -> Result<PathBuf, StoreError> {
        let dest = self.artifact_path(sha256);
        if dest.exists() {
            return Ok(dest);
        }
        let mut reader = File::open(src).map_err(|e| io_err(src, e))?;
        let mut tmp = temp_beside(&dest)?;
        std::io::copy(&mut reader, &mut tmp).map_err(|e| io_err(tmp.path(), e))?;
        tmp.persist(&dest).map_err(|e| io_err(&dest, e.error))?;
        Ok(dest)
    }

    /// Store a content record. Records are immutable; an existing record with
    /// the same id is kept as is.
    pub fn put_content(&self, record: &ContentRecord) -> Result<(), StoreError> {
        let path = self.content_path(&record.id);
        if path.exists() {
            return Ok(());
        }
        write_json(&path, record)
    }

    pub fn load_content(&self, id: &ContentId) -> Result<ContentRecord, StoreError> {
        let path = self.content_path(id);
        if !path.exists() {
            return Err(StoreError::ContentNotFound { id: id.0.clone() });
        }
        read_json(&path)
    }
}

// ---------------------------------------------------------------------------
// Provisional versions
// ---------------------------------------------------------------------------

/// A repository version under construction. Invisible to readers until sealed.
///
/// Holds the repository's sync lock for its whole lifetime.
#[derive(Debug)]
pub struct ProvisionalVersion {
    repository: RepositoryName,
    number: u64,
    base: Option<RepositoryVersion>,
    content: BTreeMap<ContentId, NaturalKey>,
    _lock: File,
}

impl ProvisionalVersion {
    pub fn repository(&self) -> &RepositoryName {
        &self.repository
    }

    /// The number this version will have once sealed.
    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn base(&self) -> Option<&RepositoryVersion> {
        self.base.as_ref()
    }

    /// Add a stored content record. Returns `false` if it was already a member.
    pub fn attach(&mut self, record: &ContentRecord) -> bool {
        self.content.insert(record.id.clone(), record.key()).is_none()
    }

    /// Remove a member. Returns `false` if it was not a member.
    pub fn detach(&mut self, id: &ContentId) -> bool {
        self.content.remove(id).is_some()
    }

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
// Private helpers
// ---------------------------------------------------------------------------

fn fanout(hex: &str) -> &str {
    hex.get(..2).unwrap_or("00")
}

fn temp_beside(dest: &Path) -> Result<NamedTempFile, StoreError> {
    let Some(dir) = dest.parent() else {
        return Err(io_err(dest, std::io::Error::other("path has no parent")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    NamedTempFile::new_in(dir).map_err(|e| io_err(dir, e))
}

fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut tmp = temp_beside(dest)?;
    tmp.write_all(bytes).map_err(|e| io_err(tmp.path(), e))?;
    tmp.persist(dest).map_err(|e| io_err(dest, e.error))?;
    Ok(())
}

fn write_json<T: Serialize>(dest: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| json_err(dest, e))?;
    write_atomic(dest, &json)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = std::fs::read(path).map_err(|e| io_err(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| json_err(path, e))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
