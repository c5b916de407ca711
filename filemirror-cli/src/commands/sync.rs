//! `filemirror sync`: mirror a remote into a new repository version.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use filemirror_core::{
    remotes,
    types::{ContentId, NaturalKey, RemoteName, RepositoryName},
    Store,
};
use filemirror_sync::{
    ChangeReport, ConcurrentApplier, SyncEvent, SyncOptions, SyncReport, Synchronizer,
    UrlDownloader,
};

use super::home;

/// Arguments for `filemirror sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Name of the remote to synchronize from.
    pub remote: String,

    /// Target repository; created if missing. Defaults to the remote's name.
    #[arg(long, short = 'r')]
    pub repository: Option<String>,

    /// Keep local content the remote no longer lists, for this run only.
    #[arg(long)]
    pub additive: bool,

    /// Chunk size for removal lookups, for this run only.
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Compute the plan without downloading or committing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Emit the sync report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let remote = remotes::load_remote_at(&home, &RemoteName::from(self.remote.clone()))
            .with_context(|| {
                format!(
                    "failed to load remote '{}'; run `filemirror remote add` first",
                    self.remote
                )
            })?;
        let repository = RepositoryName::from(
            self.repository
                .clone()
                .unwrap_or_else(|| remote.name.0.clone()),
        );

        let store = Store::open_at(&home);
        if store
            .create_repository(&repository)
            .with_context(|| format!("failed to create repository '{repository}'"))?
            && !self.json
        {
            println!("✓ Created repository '{repository}'");
        }

        let mut options = SyncOptions::from_remote(&remote);
        if self.additive {
            options.mirror = false;
        }
        if let Some(n) = self.batch_size {
            options.batch_size = n;
        }
        options.dry_run = self.dry_run;

        let downloader = Arc::new(UrlDownloader::new(remote.retries));
        let engine = ConcurrentApplier::new(downloader.clone(), remote.download_workers);
        let synchronizer = Synchronizer::new(&store, downloader, &engine);

        tracing::info!("syncing remote '{}' into '{repository}'", remote.name);
        let report = synchronizer
            .synchronize(&remote, &repository, &options, &mut |event| {
                if let SyncEvent::ItemFailed { subject, reason } = event {
                    eprintln!("  {}  {subject}: {reason}", "✗".red().bold());
                }
            })
            .with_context(|| format!("sync of '{}' into '{repository}' failed", remote.name))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize sync report")?
            );
            return Ok(());
        }
        let removed = removed_keys(&store, &report)?;
        print_results(&report, &removed, self.dry_run);
        Ok(())
    }
}

/// Keys of removed content, looked up in the base version.
fn removed_keys(store: &Store, report: &SyncReport) -> Result<HashMap<ContentId, NaturalKey>> {
    let Some(base) = report.base else {
        return Ok(HashMap::new());
    };
    if report.removals == 0 {
        return Ok(HashMap::new());
    }
    let version = store
        .version(&report.repository, base)
        .with_context(|| format!("failed to read version {base} of '{}'", report.repository))?;
    Ok(version.content.into_iter().collect())
}

fn print_results(report: &SyncReport, removed: &HashMap<ContentId, NaturalKey>, dry_run: bool) {
    let name = &report.repository;
    if dry_run {
        println!(
            "[dry-run] ✓ '{name}' would add {} and remove {} unit(s)",
            report.additions, report.removals
        );
        return;
    }
    let Some(version) = &report.version else {
        return;
    };
    if report.changes.is_empty() {
        println!("✓ '{name}' is up to date (version {})", version.number);
        return;
    }

    println!(
        "✓ '{name}' synced to version {} ({} added, {} removed)",
        version.number, report.additions, report.removals
    );
    for change in &report.changes {
        match change {
            ChangeReport::Added { path, .. } => println!("  {}  {path}", "+".green()),
            ChangeReport::Removed { id } => {
                let label = removed.get(id).map_or(id.0.as_str(), |k| k.path.as_str());
                println!("  {}  {label}", "-".red());
            }
            ChangeReport::Failed { subject, .. } => println!("  {}  {subject}", "✗".red()),
        }
    }
}
