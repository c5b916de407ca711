//! Materialize a repository version as a plain directory tree.
//!
//! Each member's artifact is copied to `<dest>/<path>` through a
//! `<path>.filemirror.tmp` file and renamed into place. Files whose current
//! bytes already hash to the member's digest are left alone.

use std::path::{Path, PathBuf};

use filemirror_core::{RepositoryVersion, Store};

use crate::additions::check_relative;
use crate::error::io_err;
use crate::hash::sha256_file;
use crate::SyncError;

// ---------------------------------------------------------------------------
// Export result
// ---------------------------------------------------------------------------

/// Outcome of exporting a single member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportResult {
    /// File was written (missing or different content).
    Written { path: PathBuf },
    /// File already held the member's content.
    Unchanged { path: PathBuf },
}

// ---------------------------------------------------------------------------
// export_version
// ---------------------------------------------------------------------------

/// Write every member of `version` below `dest`, in path order.
pub fn export_version(
    store: &Store,
    version: &RepositoryVersion,
    dest: &Path,
) -> Result<Vec<ExportResult>, SyncError> {
    let mut members: Vec<_> = version.content.iter().collect();
    members.sort_by(|a, b| a.1.cmp(b.1));

    let mut results = Vec::with_capacity(members.len());
    for (id, key) in members {
        check_relative(&key.path)?;
        let record = store.load_content(id)?;
        let artifact = store.artifact_path(&record.digest);
        let target = dest.join(&key.path);
        results.push(export_file(&artifact, &target, &record.digest)?);
    }
    tracing::info!(
        "exported {} version {} to {}",
        version.repository,
        version.number,
        dest.display()
    );
    Ok(results)
}

fn export_file(artifact: &Path, target: &Path, digest: &str) -> Result<ExportResult, SyncError> {
    if target.is_file() {
        let current = sha256_file(target).map_err(|e| io_err(target, e))?;
        if current == digest {
            tracing::debug!("unchanged: {}", target.display());
            return Ok(ExportResult::Unchanged {
                path: target.to_path_buf(),
            });
        }
    }

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let tmp = PathBuf::from(format!("{}.filemirror.tmp", target.display()));
    if let Err(e) = std::fs::copy(artifact, &tmp) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(artifact, e));
    }
    if let Err(e) = std::fs::rename(&tmp, target) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(target, e));
    }

    tracing::debug!("wrote: {}", target.display());
    Ok(ExportResult::Written {
        path: target.to_path_buf(),
    })
}
