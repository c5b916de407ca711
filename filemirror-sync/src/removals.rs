//! Removal planning: resolve removal keys to content ids of the base version.
//!
//! Keys are looked up in fixed-size batches, one disjunctive lookup per batch,
//! instead of one lookup per key or a single unbounded one.

use std::collections::HashSet;

use filemirror_core::{ContentId, NaturalKey, RepositoryVersion, Store};

use crate::sized::SizedIter;

/// Lazy removal plan; `total()` equals the number of removal keys.
pub type RemovalPlan<'a> = SizedIter<PendingRemovals<'a>>;

/// Build the content to be removed.
///
/// `batch_size` of 0 is treated as 1. Keys are resolved in sorted order so
/// repeated runs issue identical lookups.
pub fn build_removals<'a>(
    store: &'a Store,
    base: Option<&'a RepositoryVersion>,
    removals: HashSet<NaturalKey>,
    batch_size: usize,
) -> RemovalPlan<'a> {
    let total = removals.len();
    let mut keys: Vec<NaturalKey> = removals.into_iter().collect();
    keys.sort();
    let pending = PendingRemovals {
        store,
        base,
        keys: keys.into_iter(),
        batch_size: batch_size.max(1),
        resolved: Vec::new().into_iter(),
        lookups: 0,
    };
    SizedIter::new(pending, total)
}

/// Generator behind [`RemovalPlan`].
#[derive(Debug)]
pub struct PendingRemovals<'a> {
    store: &'a Store,
    base: Option<&'a RepositoryVersion>,
    keys: std::vec::IntoIter<NaturalKey>,
    batch_size: usize,
    resolved: std::vec::IntoIter<ContentId>,
    lookups: usize,
}

impl PendingRemovals<'_> {
    /// Number of batch lookups issued so far.
    pub fn lookups(&self) -> usize {
        self.lookups
    }
}

impl Iterator for PendingRemovals<'_> {
    type Item = ContentId;

    fn next(&mut self) -> Option<ContentId> {
        loop {
            if let Some(id) = self.resolved.next() {
                return Some(id);
            }
            let base = self.base?;
            let batch: Vec<NaturalKey> = self.keys.by_ref().take(self.batch_size).collect();
            if batch.is_empty() {
                return None;
            }
            self.lookups += 1;
            let found = self.store.find_content(base, &batch);
            tracing::debug!(
                "removal batch {}: {} key(s), {} match(es)",
                self.lookups,
                batch.len(),
                found.len()
            );
            self.resolved = found.into_iter();
        }
    }
}
