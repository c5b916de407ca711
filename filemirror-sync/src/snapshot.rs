//! Natural-key view of an existing repository version.

use std::collections::HashSet;

use filemirror_core::{NaturalKey, RepositoryVersion};

/// Natural keys of everything in `base`. An absent base (first sync) is the
/// empty set.
pub fn read_snapshot(base: Option<&RepositoryVersion>) -> HashSet<NaturalKey> {
    base.map(|version| version.keys().cloned().collect())
        .unwrap_or_default()
}
