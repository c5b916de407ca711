//! Sync orchestrator: manifest fetch → snapshot read → delta → plan → apply →
//! commit, with every failure unwinding the provisional version.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

use filemirror_core::types::DEFAULT_BATCH_SIZE;
use filemirror_core::{Remote, RepositoryName, RepositoryVersion, Store};

use crate::additions::{build_additions, check_relative};
use crate::apply::{ApplyEngine, ChangeReport};
use crate::delta::find_delta;
use crate::download::Downloader;
use crate::error::io_err;
use crate::events::{SyncEvent, SyncPhase};
use crate::manifest::Manifest;
use crate::removals::build_removals;
use crate::snapshot::read_snapshot;
use crate::SyncError;

/// Per-invocation sync settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Remove local content the remote no longer lists.
    pub mirror: bool,
    /// Removal lookup chunk size; 0 behaves as 1.
    pub batch_size: usize,
    /// Stop after planning and discard the provisional version.
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            mirror: true,
            batch_size: DEFAULT_BATCH_SIZE,
            dry_run: false,
        }
    }
}

impl SyncOptions {
    pub fn from_remote(remote: &Remote) -> Self {
        Self {
            mirror: remote.mirror,
            batch_size: remote.batch_size,
            dry_run: false,
        }
    }
}

/// Result of a sync that did not abort.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub repository: RepositoryName,
    /// Number of the version the sync started from.
    pub base: Option<u64>,
    /// The sealed version; `None` for a dry run.
    pub version: Option<RepositoryVersion>,
    pub additions: usize,
    pub removals: usize,
    pub changes: Vec<ChangeReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Drives one sync of a remote into a repository.
pub struct Synchronizer<'a> {
    store: &'a Store,
    downloader: Arc<dyn Downloader>,
    engine: &'a dyn ApplyEngine,
}

impl<'a> Synchronizer<'a> {
    pub fn new(
        store: &'a Store,
        downloader: Arc<dyn Downloader>,
        engine: &'a dyn ApplyEngine,
    ) -> Self {
        Self {
            store,
            downloader,
            engine,
        }
    }

    /// Mirror `remote` into a new version of `repository`.
    ///
    /// On success exactly one new version is sealed (none for a dry run). On
    /// any error the repository's latest version is left unchanged and an
    /// [`SyncEvent::Aborted`] event carries the last phase reached.
    pub fn synchronize(
        &self,
        remote: &Remote,
        repository: &RepositoryName,
        options: &SyncOptions,
        on_event: &mut dyn FnMut(&SyncEvent),
    ) -> Result<SyncReport, SyncError> {
        let mut phase = SyncPhase::Start;
        let result = self.run(remote, repository, options, &mut phase, on_event);
        if let Err(e) = &result {
            tracing::warn!("sync of '{repository}' aborted after {phase}: {e}");
            on_event(&SyncEvent::Aborted {
                phase,
                reason: e.to_string(),
            });
        }
        result
    }

    fn run(
        &self,
        remote: &Remote,
        repository: &RepositoryName,
        options: &SyncOptions,
        phase: &mut SyncPhase,
        on_event: &mut dyn FnMut(&SyncEvent),
    ) -> Result<SyncReport, SyncError> {
        let started_at = Utc::now();
        let source = source_url(remote)?;
        on_event(&SyncEvent::Started {
            remote: remote.name.to_string(),
            repository: repository.to_string(),
        });

        // Removed on every exit path when dropped.
        let workdir = tempfile::Builder::new()
            .prefix("filemirror-sync-")
            .tempdir()
            .map_err(|e| io_err(std::env::temp_dir(), e))?;

        // START → MANIFEST_FETCHED
        let manifest = Manifest::new(self.downloader.fetch(&source, workdir.path())?);
        *phase = SyncPhase::ManifestFetched;
        tracing::info!("fetched manifest {source}");
        on_event(&SyncEvent::ManifestFetched {
            url: source.to_string(),
        });

        // MANIFEST_FETCHED → SNAPSHOT_READ
        let provisional = self.store.create_provisional(repository)?;
        let base = provisional.base().cloned();
        let local = read_snapshot(base.as_ref());
        *phase = SyncPhase::SnapshotRead;
        on_event(&SyncEvent::SnapshotRead {
            base: base.as_ref().map(|v| v.number),
            keys: local.len(),
        });

        // SNAPSHOT_READ → DELTA_COMPUTED
        let remote_keys = manifest.keys()?;
        for key in &remote_keys {
            check_relative(&key.path)?;
        }
        let delta = find_delta(&remote_keys, &local, options.mirror);
        *phase = SyncPhase::DeltaComputed;
        tracing::info!(
            "'{repository}': {} addition(s), {} removal(s)",
            delta.additions.len(),
            delta.removals.len()
        );
        on_event(&SyncEvent::DeltaComputed {
            additions: delta.additions.len(),
            removals: delta.removals.len(),
        });

        // DELTA_COMPUTED → PLAN_BUILT
        let additions = build_additions(&manifest, &source, delta.additions);
        let removals =
            build_removals(self.store, base.as_ref(), delta.removals, options.batch_size);
        let planned = (additions.total(), removals.total());
        *phase = SyncPhase::PlanBuilt;
        on_event(&SyncEvent::PlanBuilt {
            additions: planned.0,
            removals: planned.1,
        });

        let mut report = SyncReport {
            repository: repository.clone(),
            base: base.as_ref().map(|v| v.number),
            version: None,
            additions: planned.0,
            removals: planned.1,
            changes: Vec::new(),
            started_at,
            finished_at: started_at,
        };
        if options.dry_run {
            report.finished_at = Utc::now();
            self.store.discard(provisional);
            tracing::info!("dry run of '{repository}' complete, nothing applied");
            return Ok(report);
        }

        // PLAN_BUILT → APPLIED
        let mut provisional = provisional;
        let changes = self.engine.apply(
            self.store,
            additions,
            removals,
            &mut provisional,
            workdir.path(),
        )?;
        let mut failures = Vec::new();
        for change in &changes {
            match change {
                ChangeReport::Failed { subject, reason } => {
                    failures.push(format!("{subject}: {reason}"));
                    on_event(&SyncEvent::ItemFailed {
                        subject: subject.clone(),
                        reason: reason.clone(),
                    });
                }
                other => on_event(&SyncEvent::Applied {
                    change: other.clone(),
                }),
            }
        }
        let applied = changes.len() - failures.len();
        if failures.is_empty() && applied < planned.0 + planned.1 {
            failures.push(format!(
                "only {applied} of {} planned change(s) were applied",
                planned.0 + planned.1
            ));
        }
        if let Some(first) = failures.first() {
            let failed = failures.len();
            let first = first.clone();
            self.store.discard(provisional);
            return Err(SyncError::ApplyFailed { failed, first });
        }
        *phase = SyncPhase::Applied;

        // APPLIED → COMMITTED
        let version = self.store.seal(provisional)?;
        *phase = SyncPhase::Committed;
        tracing::info!(
            "committed '{repository}' version {} ({} unit(s))",
            version.number,
            version.len()
        );
        on_event(&SyncEvent::Committed {
            version: version.number,
        });

        report.version = Some(version);
        report.changes = changes;
        report.finished_at = Utc::now();
        Ok(report)
    }
}

/// The remote's manifest URL. Checked before any I/O.
fn source_url(remote: &Remote) -> Result<Url, SyncError> {
    let raw = remote
        .url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| SyncError::MissingSource {
            remote: remote.name.to_string(),
        })?;
    Url::parse(raw).map_err(|e| SyncError::InvalidSource {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use filemirror_core::{NaturalKey, ProvisionalVersion, RemoteName};
    use tempfile::TempDir;

    use super::*;
    use crate::additions::AdditionPlan;
    use crate::apply::ConcurrentApplier;
    use crate::download::TransportError;
    use crate::hash::sha256_bytes;
    use crate::removals::RemovalPlan;

    const MANIFEST_URL: &str = "http://host/repo/PULP_MANIFEST";

    /// In-memory remote: URL → body.
    #[derive(Default)]
    struct FakeRemote {
        bodies: Mutex<HashMap<String, Vec<u8>>>,
        fetched: Mutex<Vec<String>>,
    }

    impl FakeRemote {
        /// Publish `files` and a manifest listing them, replacing the old listing.
        fn publish(&self, files: &[(&str, &str)]) {
            let mut bodies = self.bodies.lock().unwrap();
            let mut manifest = String::new();
            for (path, body) in files {
                let digest = sha256_bytes(body.as_bytes());
                manifest.push_str(&format!("{path},{digest},{}\n", body.len()));
                bodies.insert(format!("http://host/repo/{path}"), body.as_bytes().to_vec());
            }
            bodies.insert(MANIFEST_URL.to_string(), manifest.into_bytes());
        }

        fn corrupt(&self, path: &str) {
            let mut bodies = self.bodies.lock().unwrap();
            bodies.insert(format!("http://host/repo/{path}"), b"corrupted".to_vec());
        }
    }

    impl Downloader for FakeRemote {
        fn fetch(&self, url: &Url, workdir: &Path) -> Result<PathBuf, TransportError> {
            self.fetched.lock().unwrap().push(url.to_string());
            let body = self.bodies.lock().unwrap().get(url.as_str()).cloned();
            let body = body.ok_or(TransportError::Status {
                url: url.to_string(),
                status: 404,
            })?;
            let path = workdir.join(sha256_bytes(url.as_str().as_bytes()));
            std::fs::write(&path, body).unwrap();
            Ok(path)
        }
    }

    /// Applies normally, then reports the last item as failed.
    struct FailLast(ConcurrentApplier);

    impl ApplyEngine for FailLast {
        fn apply(
            &self,
            store: &Store,
            additions: AdditionPlan,
            removals: RemovalPlan<'_>,
            target: &mut ProvisionalVersion,
            workdir: &Path,
        ) -> Result<Vec<ChangeReport>, SyncError> {
            let mut reports = self.0.apply(store, additions, removals, target, workdir)?;
            if let Some(last) = reports.pop() {
                reports.push(ChangeReport::Failed {
                    subject: format!("{last:?}"),
                    reason: "simulated".to_string(),
                });
            }
            Ok(reports)
        }
    }

    struct Fixture {
        _home: TempDir,
        store: Store,
        remote: Arc<FakeRemote>,
        repo: RepositoryName,
    }

    impl Fixture {
        fn new() -> Self {
            let home = TempDir::new().unwrap();
            let store = Store::open_at(home.path());
            let repo = RepositoryName::from("iso");
            store.create_repository(&repo).unwrap();
            Self {
                _home: home,
                store,
                remote: Arc::new(FakeRemote::default()),
                repo,
            }
        }

        fn remote_config(&self) -> Remote {
            Remote::new(RemoteName::from("upstream"), Some(MANIFEST_URL.to_string()))
        }

        fn sync_with(
            &self,
            engine: &dyn ApplyEngine,
            options: &SyncOptions,
        ) -> (Result<SyncReport, SyncError>, Vec<SyncEvent>) {
            let mut events = Vec::new();
            let sync = Synchronizer::new(&self.store, self.remote.clone(), engine);
            let result = sync.synchronize(&self.remote_config(), &self.repo, options, &mut |e| {
                events.push(e.clone())
            });
            (result, events)
        }

        fn sync(&self, options: &SyncOptions) -> (Result<SyncReport, SyncError>, Vec<SyncEvent>) {
            let engine = ConcurrentApplier::new(self.remote.clone(), 2);
            self.sync_with(&engine, options)
        }

        fn latest_keys(&self) -> HashSet<NaturalKey> {
            let latest = self.store.latest(&self.repo).unwrap();
            read_snapshot(latest.as_ref())
        }
    }

    fn key(path: &str, body: &str) -> NaturalKey {
        NaturalKey::new(path, sha256_bytes(body.as_bytes()))
    }

    fn delta_counts(events: &[SyncEvent]) -> Option<(usize, usize)> {
        events.iter().find_map(|e| match e {
            SyncEvent::DeltaComputed {
                additions,
                removals,
            } => Some((*additions, *removals)),
            _ => None,
        })
    }

    #[test]
    fn missing_source_fails_before_any_io() {
        let fx = Fixture::new();
        let engine = ConcurrentApplier::new(fx.remote.clone(), 1);
        let sync = Synchronizer::new(&fx.store, fx.remote.clone(), &engine);
        for url in [None, Some("  ".to_string())] {
            let remote = Remote::new(RemoteName::from("upstream"), url);
            let mut events = Vec::new();
            let err = sync
                .synchronize(&remote, &fx.repo, &SyncOptions::default(), &mut |e| {
                    events.push(e.clone())
                })
                .unwrap_err();
            assert!(matches!(err, SyncError::MissingSource { .. }));
            assert_eq!(
                events,
                vec![SyncEvent::Aborted {
                    phase: SyncPhase::Start,
                    reason: err.to_string()
                }]
            );
        }
        assert!(fx.remote.fetched.lock().unwrap().is_empty());
    }

    #[test]
    fn mirrors_example_scenario() {
        let fx = Fixture::new();
        fx.remote.publish(&[("a", "1"), ("b", "2")]);
        let (first, _) = fx.sync(&SyncOptions::default());
        assert_eq!(first.unwrap().version.unwrap().number, 1);

        fx.remote.publish(&[("b", "2"), ("c", "3")]);
        let (second, events) = fx.sync(&SyncOptions::default());
        let report = second.unwrap();

        assert_eq!(delta_counts(&events), Some((1, 1)));
        assert_eq!(report.base, Some(1));
        assert_eq!(report.version.as_ref().unwrap().number, 2);
        assert_eq!(
            fx.latest_keys(),
            HashSet::from([key("b", "2"), key("c", "3")])
        );
        assert!(matches!(events.last(), Some(SyncEvent::Committed { version: 2 })));
    }

    #[test]
    fn second_sync_of_unchanged_remote_is_empty() {
        let fx = Fixture::new();
        fx.remote.publish(&[("a", "1"), ("dir/b", "2")]);
        let first = fx.sync(&SyncOptions::default()).0.unwrap();
        let (second, events) = fx.sync(&SyncOptions::default());
        let second = second.unwrap();

        assert_eq!(delta_counts(&events), Some((0, 0)));
        assert!(second.changes.is_empty());
        let (v1, v2) = (first.version.unwrap(), second.version.unwrap());
        assert_eq!(v2.number, 2);
        assert_eq!(v1.content, v2.content);
    }

    #[test]
    fn additive_sync_keeps_local_only_content() {
        let fx = Fixture::new();
        fx.remote.publish(&[("a", "1"), ("b", "2")]);
        fx.sync(&SyncOptions::default()).0.unwrap();

        fx.remote.publish(&[("c", "3")]);
        let options = SyncOptions {
            mirror: false,
            ..SyncOptions::default()
        };
        let (result, events) = fx.sync(&options);
        result.unwrap();

        assert_eq!(delta_counts(&events), Some((1, 0)));
        assert_eq!(
            fx.latest_keys(),
            HashSet::from([key("a", "1"), key("b", "2"), key("c", "3")])
        );
    }

    #[test]
    fn changed_digest_is_add_plus_remove() {
        let fx = Fixture::new();
        fx.remote.publish(&[("a", "old")]);
        fx.sync(&SyncOptions::default()).0.unwrap();

        fx.remote.publish(&[("a", "new")]);
        let (result, events) = fx.sync(&SyncOptions::default());
        let report = result.unwrap();

        assert_eq!(delta_counts(&events), Some((1, 1)));
        assert!(report
            .changes
            .iter()
            .any(|c| matches!(c, ChangeReport::Removed { .. })));
        assert_eq!(fx.latest_keys(), HashSet::from([key("a", "new")]));
    }

    #[test]
    fn failure_on_last_item_leaves_latest_unchanged() {
        let fx = Fixture::new();
        fx.remote.publish(&[("a", "1")]);
        let before = fx.sync(&SyncOptions::default()).0.unwrap().version;

        fx.remote.publish(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let engine = FailLast(ConcurrentApplier::new(fx.remote.clone(), 2));
        let (result, events) = fx.sync_with(&engine, &SyncOptions::default());

        assert!(matches!(result, Err(SyncError::ApplyFailed { failed: 1, .. })));
        assert!(events.iter().any(|e| matches!(e, SyncEvent::ItemFailed { .. })));
        assert!(matches!(
            events.last(),
            Some(SyncEvent::Aborted {
                phase: SyncPhase::PlanBuilt,
                ..
            })
        ));
        assert_eq!(fx.store.latest(&fx.repo).unwrap(), before);
        assert_eq!(fx.store.version_numbers(&fx.repo).unwrap(), vec![1]);
    }

    #[test]
    fn corrupt_artifact_aborts_the_sync() {
        let fx = Fixture::new();
        fx.remote.publish(&[("a", "1"), ("b", "2")]);
        fx.remote.corrupt("b");

        let (result, _) = fx.sync(&SyncOptions::default());
        match result {
            Err(SyncError::ApplyFailed { first, .. }) => assert!(first.contains("mismatch")),
            other => panic!("expected apply failure, got {other:?}"),
        }
        assert!(fx.store.latest(&fx.repo).unwrap().is_none());
    }

    #[test]
    fn manifest_fetch_failure_creates_no_version() {
        let fx = Fixture::new();
        let (result, events) = fx.sync(&SyncOptions::default());

        assert!(matches!(result, Err(SyncError::Transport(_))));
        assert!(matches!(
            events.last(),
            Some(SyncEvent::Aborted {
                phase: SyncPhase::Start,
                ..
            })
        ));
        assert!(fx.store.version_numbers(&fx.repo).unwrap().is_empty());
    }

    #[test]
    fn malformed_manifest_aborts_before_apply() {
        let fx = Fixture::new();
        fx.remote
            .bodies
            .lock()
            .unwrap()
            .insert(MANIFEST_URL.to_string(), b"a.iso,zz,1\n".to_vec());

        let (result, events) = fx.sync(&SyncOptions::default());
        assert!(matches!(result, Err(SyncError::Manifest(_))));
        assert!(matches!(
            events.last(),
            Some(SyncEvent::Aborted {
                phase: SyncPhase::SnapshotRead,
                ..
            })
        ));
    }

    #[test]
    fn traversing_entry_aborts_before_any_download() {
        let fx = Fixture::new();
        let mut files: Vec<(String, String)> =
            (0..40).map(|i| (format!("f{i:02}.iso"), format!("body {i}"))).collect();
        files.push(("../evil".to_string(), "evil".to_string()));
        let files: Vec<(&str, &str)> =
            files.iter().map(|(p, b)| (p.as_str(), b.as_str())).collect();
        fx.remote.publish(&files);

        let engine = ConcurrentApplier::new(fx.remote.clone(), 1);
        let (result, events) = fx.sync_with(&engine, &SyncOptions::default());

        assert!(matches!(result, Err(SyncError::PathTraversal { ref path }) if path == "../evil"));
        assert!(matches!(
            events.last(),
            Some(SyncEvent::Aborted {
                phase: SyncPhase::SnapshotRead,
                ..
            })
        ));
        assert!(!events.iter().any(|e| matches!(e, SyncEvent::PlanBuilt { .. })));
        assert_eq!(*fx.remote.fetched.lock().unwrap(), vec![MANIFEST_URL.to_string()]);
        let first = fx.store.artifact_path(&sha256_bytes(b"body 0"));
        assert!(!first.exists());
        assert!(fx.store.version_numbers(&fx.repo).unwrap().is_empty());
    }

    #[test]
    fn dry_run_plans_without_applying() {
        let fx = Fixture::new();
        fx.remote.publish(&[("a", "1"), ("b", "2")]);
        let options = SyncOptions {
            dry_run: true,
            ..SyncOptions::default()
        };
        let (result, events) = fx.sync(&options);
        let report = result.unwrap();

        assert_eq!((report.additions, report.removals), (2, 0));
        assert!(report.version.is_none());
        assert!(matches!(
            events.last(),
            Some(SyncEvent::PlanBuilt {
                additions: 2,
                removals: 0
            })
        ));
        assert_eq!(fx.remote.fetched.lock().unwrap().len(), 1);
        assert!(fx.store.latest(&fx.repo).unwrap().is_none());

        // The lock was released: a real sync can follow.
        assert!(fx.sync(&SyncOptions::default()).0.is_ok());
    }
}
