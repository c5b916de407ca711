//! `filemirror version list|show|export`

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use filemirror_core::{
    types::{RepositoryName, RepositoryVersion},
    Store,
};
use filemirror_sync::{export_version, ExportResult};

use super::home;

/// Inspect and export repository versions.
#[derive(Subcommand, Debug)]
pub enum VersionCommand {
    /// List the sealed versions of a repository.
    List {
        repository: String,

        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the content of a version (the latest when no number is given).
    Show {
        repository: String,
        number: Option<u64>,

        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Write the files of a version into a directory.
    Export(ExportArgs),
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    pub repository: String,

    /// Destination directory; created if missing.
    pub dest: PathBuf,

    /// Version to export. Defaults to the latest.
    #[arg(long, value_name = "N")]
    pub number: Option<u64>,
}

pub fn run(cmd: VersionCommand) -> Result<()> {
    let store = Store::open_at(&home()?);
    match cmd {
        VersionCommand::List { repository, json } => list(&store, &repository, json),
        VersionCommand::Show {
            repository,
            number,
            json,
        } => show(&store, &repository, number, json),
        VersionCommand::Export(args) => export(&store, args),
    }
}

/// The requested version, or the latest one.
fn resolve(store: &Store, repository: &str, number: Option<u64>) -> Result<RepositoryVersion> {
    let name = RepositoryName::from(repository);
    match number {
        Some(n) => store
            .version(&name, n)
            .with_context(|| format!("failed to load version {n} of '{repository}'")),
        None => store
            .latest(&name)
            .with_context(|| format!("failed to load versions of '{repository}'"))?
            .with_context(|| format!("'{repository}' has no versions yet; run `filemirror sync`")),
    }
}

fn timestamp(version: &RepositoryVersion) -> String {
    version.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

#[derive(Tabled, Serialize)]
struct VersionRow {
    #[tabled(rename = "version")]
    number: u64,
    #[tabled(rename = "base", display_with = "display_base")]
    base: Option<u64>,
    #[tabled(rename = "units")]
    units: usize,
    #[tabled(rename = "created")]
    created_at: String,
}

fn display_base(base: &Option<u64>) -> String {
    base.map_or_else(|| "-".to_string(), |n| n.to_string())
}

fn list(store: &Store, repository: &str, json: bool) -> Result<()> {
    let versions = store
        .versions(&RepositoryName::from(repository))
        .with_context(|| format!("failed to load versions of '{repository}'"))?;
    let rows: Vec<VersionRow> = versions
        .iter()
        .map(|v| VersionRow {
            number: v.number,
            base: v.base,
            units: v.len(),
            created_at: timestamp(v),
        })
        .collect();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&rows).context("failed to serialize versions")?
        );
        return Ok(());
    }
    if rows.is_empty() {
        println!("'{repository}' has no versions yet.");
        return Ok(());
    }
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

#[derive(Tabled, Serialize)]
struct UnitRow {
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "digest", display_with = "short_digest")]
    digest: String,
    #[tabled(rename = "size")]
    size: u64,
}

fn short_digest(digest: &str) -> String {
    digest.chars().take(12).collect()
}

#[derive(Serialize)]
struct VersionJson {
    repository: String,
    number: u64,
    base: Option<u64>,
    created_at: String,
    content: Vec<UnitRow>,
}

fn show(store: &Store, repository: &str, number: Option<u64>, json: bool) -> Result<()> {
    let version = resolve(store, repository, number)?;
    let mut units = Vec::with_capacity(version.len());
    for id in version.content.keys() {
        let record = store
            .load_content(id)
            .with_context(|| format!("failed to load content record {id}"))?;
        units.push(UnitRow {
            path: record.path,
            digest: record.digest,
            size: record.size,
        });
    }
    units.sort_by(|a, b| a.path.cmp(&b.path));

    if json {
        let payload = VersionJson {
            repository: version.repository.0.clone(),
            number: version.number,
            base: version.base,
            created_at: timestamp(&version),
            content: units,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).context("failed to serialize version")?
        );
        return Ok(());
    }

    println!(
        "{} version {} | base {} | {} unit(s) | {}",
        version.repository.0.bold(),
        version.number,
        display_base(&version.base),
        version.len(),
        timestamp(&version)
    );
    if !units.is_empty() {
        let mut table = Table::new(units);
        table.with(Style::rounded());
        println!("{table}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// export
// ---------------------------------------------------------------------------

fn export(store: &Store, args: ExportArgs) -> Result<()> {
    let version = resolve(store, &args.repository, args.number)?;
    let results = export_version(store, &version, &args.dest).with_context(|| {
        format!(
            "failed to export '{}' version {} to {}",
            args.repository,
            version.number,
            args.dest.display()
        )
    })?;

    let written = results
        .iter()
        .filter(|r| matches!(r, ExportResult::Written { .. }))
        .count();
    println!(
        "✓ Exported '{}' version {} to {} ({} written, {} unchanged)",
        args.repository,
        version.number,
        args.dest.display(),
        written,
        results.len() - written
    );
    for r in &results {
        match r {
            ExportResult::Written { path } => println!("  ✎  {}", path.display()),
            ExportResult::Unchanged { path } => println!("  ·  {}", path.display()),
        }
    }
    Ok(())
}
