//! Addition planning: one content record plus fetch descriptor per added key.
//!
//! Fetch URLs are built by joining each entry's relative path onto the
//! directory of the manifest URL, keeping the manifest URL's scheme, host and
//! query.

use std::collections::HashSet;

use url::Url;

use filemirror_core::NaturalKey;

use crate::manifest::{Manifest, ManifestReader};
use crate::sized::SizedIter;
use crate::SyncError;

/// Where to get one artifact of a new content unit and what it must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchDescriptor {
    pub url: Url,
    pub expected_size: u64,
    pub expected_digest: String,
    /// Path of the artifact relative to the content unit's root.
    pub relative_path: String,
}

/// A content unit to create, with the artifacts it is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdditionItem {
    pub key: NaturalKey,
    pub size: u64,
    pub artifacts: Vec<FetchDescriptor>,
}

/// Lazy addition plan; `total()` equals the number of addition keys.
pub type AdditionPlan = SizedIter<PendingAdditions>;

/// Build the content to be added.
///
/// No I/O happens until the plan is iterated. Each pass re-reads the manifest
/// and yields an item for each entry whose key is still pending.
pub fn build_additions(
    manifest: &Manifest,
    source: &Url,
    additions: HashSet<NaturalKey>,
) -> AdditionPlan {
    let total = additions.len();
    let pending = PendingAdditions {
        manifest: manifest.clone(),
        entries: None,
        source: source.clone(),
        root_dir: root_dir(source),
        pending: additions,
    };
    SizedIter::new(pending, total)
}

/// Generator behind [`AdditionPlan`].
#[derive(Debug)]
pub struct PendingAdditions {
    manifest: Manifest,
    entries: Option<ManifestReader>,
    source: Url,
    root_dir: String,
    pending: HashSet<NaturalKey>,
}

impl Iterator for PendingAdditions {
    type Item = Result<AdditionItem, SyncError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pending.is_empty() {
            return None;
        }
        if self.entries.is_none() {
            match self.manifest.read() {
                Ok(reader) => self.entries = Some(reader),
                Err(e) => {
                    self.pending.clear();
                    return Some(Err(e.into()));
                }
            }
        }
        let entries = self.entries.as_mut()?;
        for entry in entries.by_ref() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    self.pending.clear();
                    return Some(Err(e.into()));
                }
            };
            // Removing the key also drops duplicate manifest records.
            if !self.pending.remove(&entry.key()) {
                continue;
            }
            let url = match fetch_url(&self.source, &self.root_dir, &entry.path) {
                Ok(url) => url,
                Err(e) => {
                    self.pending.clear();
                    return Some(Err(e));
                }
            };
            tracing::debug!("planned addition: {} -> {}", entry.path, url);
            let artifact = FetchDescriptor {
                url,
                expected_size: entry.size,
                expected_digest: entry.digest.clone(),
                relative_path: entry.path.clone(),
            };
            return Some(Ok(AdditionItem {
                key: entry.key(),
                size: entry.size,
                artifacts: vec![artifact],
            }));
        }
        None
    }
}

/// Directory component of the URL's path, without a trailing slash.
fn root_dir(source: &Url) -> String {
    let path = source.path();
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

/// Absolute fetch URL for `relative` under `root_dir` of `source`.
pub fn fetch_url(source: &Url, root_dir: &str, relative: &str) -> Result<Url, SyncError> {
    check_relative(relative)?;
    let mut url = source.clone();
    url.set_path(&format!("{root_dir}/{relative}"));
    url.set_fragment(None);
    // Path normalization must not have left the manifest directory.
    if !url.path().starts_with(&format!("{root_dir}/")) {
        return Err(SyncError::PathTraversal {
            path: relative.to_string(),
        });
    }
    Ok(url)
}

/// Reject paths that are absolute or step outside their root.
pub fn check_relative(path: &str) -> Result<(), SyncError> {
    let escapes = path.is_empty()
        || path.starts_with(['/', '\\'])
        || path.split(['/', '\\']).any(is_parent_segment);
    if escapes {
        return Err(SyncError::PathTraversal {
            path: path.to_string(),
        });
    }
    Ok(())
}

/// `..` in any mix of literal and percent-encoded dots (`.%2e`, `%2E.`, ...).
fn is_parent_segment(segment: &str) -> bool {
    segment.to_ascii_lowercase().replace("%2e", ".") == ".."
}
