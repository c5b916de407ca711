//! # filemirror-sync
//!
//! Synchronization planning and orchestration.
//!
//! Call [`Synchronizer::synchronize`] to mirror a remote manifest into a new
//! repository version. The planning steps are exposed individually:
//! [`manifest`] → [`snapshot`] → [`delta`] → [`additions`] / [`removals`].

pub mod additions;
pub mod apply;
pub mod delta;
pub mod download;
pub mod error;
pub mod events;
pub mod export;
pub mod hash;
pub mod manifest;
pub mod orchestrator;
pub mod removals;
pub mod sized;
pub mod snapshot;

pub use additions::{build_additions, AdditionItem, AdditionPlan, FetchDescriptor};
pub use apply::{ApplyEngine, ChangeReport, ConcurrentApplier};
pub use delta::{find_delta, Delta};
pub use download::{Downloader, TransportError, UrlDownloader};
pub use error::SyncError;
pub use events::{SyncEvent, SyncPhase};
pub use export::{export_version, ExportResult};
pub use manifest::{Manifest, ManifestError};
pub use orchestrator::{SyncOptions, SyncReport, Synchronizer};
pub use removals::{build_removals, RemovalPlan};
pub use sized::SizedIter;
pub use snapshot::read_snapshot;
