//! Natural-key delta between remote and local content.
//!
//! Identity is `(path, digest)`: a path whose content changed shows up as one
//! addition and one removal, never as an update.

use std::collections::HashSet;

use filemirror_core::NaturalKey;

/// Keys to add to and remove from the new version. Always disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub additions: HashSet<NaturalKey>,
    pub removals: HashSet<NaturalKey>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }
}

/// Compute the content that needs to be added and removed.
///
/// With `mirror` the result makes the local content exactly equal to the
/// remote; without it local-only content is kept.
pub fn find_delta(
    remote: &HashSet<NaturalKey>,
    local: &HashSet<NaturalKey>,
    mirror: bool,
) -> Delta {
    let additions = remote.difference(local).cloned().collect();
    let removals = if mirror {
        local.difference(remote).cloned().collect()
    } else {
        HashSet::new()
    };
    Delta {
        additions,
        removals,
    }
}
