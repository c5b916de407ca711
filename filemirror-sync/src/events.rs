//! Structured sync events, delivered through a plain callback.

use std::fmt;

use serde::Serialize;

use crate::apply::ChangeReport;

/// Linear sync state machine. A sync never moves backwards.
///
/// An abort is not a phase: it is signalled by [`SyncEvent::Aborted`], which
/// carries the last phase reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Start,
    ManifestFetched,
    SnapshotRead,
    DeltaComputed,
    PlanBuilt,
    Applied,
    Committed,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Start => "start",
            SyncPhase::ManifestFetched => "manifest_fetched",
            SyncPhase::SnapshotRead => "snapshot_read",
            SyncPhase::DeltaComputed => "delta_computed",
            SyncPhase::PlanBuilt => "plan_built",
            SyncPhase::Applied => "applied",
            SyncPhase::Committed => "committed",
        };
        f.write_str(name)
    }
}

/// Progress of a single sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    Started { remote: String, repository: String },
    ManifestFetched { url: String },
    SnapshotRead { base: Option<u64>, keys: usize },
    DeltaComputed { additions: usize, removals: usize },
    PlanBuilt { additions: usize, removals: usize },
    Applied { change: ChangeReport },
    ItemFailed { subject: String, reason: String },
    Committed { version: u64 },
    /// Terminal failure; `phase` is the last phase reached.
    Aborted { phase: SyncPhase, reason: String },
}
