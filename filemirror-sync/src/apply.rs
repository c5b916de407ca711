//! Apply engine: turns addition and removal plans into changes on a
//! provisional version.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use url::Url;

use filemirror_core::{ContentId, ContentRecord, ProvisionalVersion, Store};

use crate::additions::{AdditionItem, AdditionPlan, FetchDescriptor};
use crate::download::Downloader;
use crate::hash::sha256_file;
use crate::removals::RemovalPlan;
use crate::SyncError;

/// Outcome of a single planned change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeReport {
    Added {
        path: String,
        digest: String,
        size: u64,
    },
    Removed {
        id: ContentId,
    },
    Failed {
        subject: String,
        reason: String,
    },
}

/// Populates a provisional version from a plan.
///
/// Item-level problems (bad download, digest mismatch) are reported as
/// [`ChangeReport::Failed`]; an `Err` means the engine could not continue at
/// all. Either way the caller must not seal `target`.
pub trait ApplyEngine {
    fn apply(
        &self,
        store: &Store,
        additions: AdditionPlan,
        removals: RemovalPlan<'_>,
        target: &mut ProvisionalVersion,
        workdir: &Path,
    ) -> Result<Vec<ChangeReport>, SyncError>;
}

/// Additions pulled from the plan per worker before a round of downloads.
const CHUNK_PER_WORKER: usize = 8;

/// Downloads artifacts on a bounded thread pool.
///
/// Each distinct URL is fetched at most once per `apply` call. Processing
/// stops after the first round that produced a failure.
pub struct ConcurrentApplier {
    downloader: Arc<dyn Downloader>,
    workers: usize,
}

impl ConcurrentApplier {
    pub fn new(downloader: Arc<dyn Downloader>, workers: usize) -> Self {
        Self {
            downloader,
            workers: workers.max(1),
        }
    }

    /// Fetch every URL of `chunk` not yet in `fetched`, concurrently.
    fn fetch_chunk(
        &self,
        pool: &rayon::ThreadPool,
        chunk: &[AdditionItem],
        fetched: &mut HashMap<Url, Result<PathBuf, String>>,
        workdir: &Path,
    ) {
        let mut urls: Vec<&Url> = chunk
            .iter()
            .flat_map(|item| item.artifacts.iter().map(|a| &a.url))
            .filter(|url| !fetched.contains_key(*url))
            .collect();
        urls.sort();
        urls.dedup();

        let results: Vec<(Url, Result<PathBuf, String>)> = pool.install(|| {
            urls.par_iter()
                .map(|url| {
                    let result = self
                        .downloader
                        .fetch(url, workdir)
                        .map_err(|e| e.to_string());
                    ((*url).clone(), result)
                })
                .collect()
        });
        fetched.extend(results);
    }
}

impl ApplyEngine for ConcurrentApplier {
    fn apply(
        &self,
        store: &Store,
        mut additions: AdditionPlan,
        removals: RemovalPlan<'_>,
        target: &mut ProvisionalVersion,
        workdir: &Path,
    ) -> Result<Vec<ChangeReport>, SyncError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("filemirror-fetch-{i}"))
            .build()
            .map_err(|e| SyncError::WorkerPool(e.to_string()))?;

        let mut reports = Vec::with_capacity(additions.total() + removals.total());
        let mut fetched = HashMap::new();
        let chunk_size = self.workers * CHUNK_PER_WORKER;

        loop {
            let chunk: Vec<AdditionItem> = additions
                .by_ref()
                .take(chunk_size)
                .collect::<Result<_, _>>()?;
            if chunk.is_empty() {
                break;
            }
            self.fetch_chunk(&pool, &chunk, &mut fetched, workdir);

            let verified: Vec<Result<Vec<PathBuf>, String>> = pool.install(|| {
                chunk
                    .par_iter()
                    .map(|item| verify_item(item, &fetched))
                    .collect()
            });

            let mut failed = false;
            for (item, outcome) in chunk.iter().zip(verified) {
                let report = match outcome {
                    Ok(paths) => attach(store, item, &paths, target)?,
                    Err(reason) => {
                        failed = true;
                        tracing::warn!("addition {} failed: {reason}", item.key);
                        ChangeReport::Failed {
                            subject: item.key.to_string(),
                            reason,
                        }
                    }
                };
                reports.push(report);
            }
            if failed {
                return Ok(reports);
            }
        }

        for id in removals {
            let report = if target.detach(&id) {
                tracing::debug!("removed {id}");
                ChangeReport::Removed { id }
            } else {
                ChangeReport::Failed {
                    subject: id.to_string(),
                    reason: "not a member of the version being built".to_string(),
                }
            };
            reports.push(report);
        }
        Ok(reports)
    }
}

/// Check every artifact of `item` was downloaded and matches expectations.
fn verify_item(
    item: &AdditionItem,
    fetched: &HashMap<Url, Result<PathBuf, String>>,
) -> Result<Vec<PathBuf>, String> {
    item.artifacts
        .iter()
        .map(|artifact| {
            let path = match fetched.get(&artifact.url) {
                Some(Ok(path)) => path,
                Some(Err(reason)) => return Err(reason.clone()),
                None => return Err(format!("{} was never fetched", artifact.url)),
            };
            verify_artifact(path, artifact)?;
            Ok(path.clone())
        })
        .collect()
}

fn verify_artifact(path: &Path, artifact: &FetchDescriptor) -> Result<(), String> {
    let size = std::fs::metadata(path)
        .map_err(|e| format!("cannot stat download of {}: {e}", artifact.url))?
        .len();
    if size != artifact.expected_size {
        return Err(format!(
            "size mismatch for {}: expected {}, got {size}",
            artifact.url, artifact.expected_size
        ));
    }
    let digest = sha256_file(path)
        .map_err(|e| format!("cannot hash download of {}: {e}", artifact.url))?;
    if digest != artifact.expected_digest {
        return Err(format!(
            "digest mismatch for {}: expected {}, got {digest}",
            artifact.url, artifact.expected_digest
        ));
    }
    Ok(())
}

/// Persist artifacts and the content record, then add it to `target`.
fn attach(
    store: &Store,
    item: &AdditionItem,
    paths: &[PathBuf],
    target: &mut ProvisionalVersion,
) -> Result<ChangeReport, SyncError> {
    for (path, artifact) in paths.iter().zip(&item.artifacts) {
        store.put_artifact(path, &artifact.expected_digest)?;
    }
    let record = ContentRecord::new(item.key.clone(), item.size);
    store.put_content(&record)?;
    target.attach(&record);
    tracing::debug!("added {}", item.key);
    Ok(ChangeReport::Added {
        path: record.path,
        digest: record.digest,
        size: record.size,
    })
}
