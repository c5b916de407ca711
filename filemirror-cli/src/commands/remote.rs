//! `filemirror remote add|list|remove`

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use filemirror_core::{remotes, types::RemoteName};

use super::home;

/// Manage remote definitions.
#[derive(Subcommand, Debug)]
pub enum RemoteCommand {
    /// Register a remote, or update the settings of an existing one.
    Add(AddArgs),

    /// List configured remotes.
    List {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Delete a remote definition. Synced repositories are kept.
    Remove {
        /// Remote name.
        name: String,
    },
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Remote name, also the default repository name for `sync`.
    pub name: String,

    /// URL of the remote manifest, e.g. https://host/repo/PULP_MANIFEST.
    #[arg(long)]
    pub url: Option<String>,

    /// Never remove local content the remote no longer lists.
    #[arg(long, conflicts_with = "mirror")]
    pub additive: bool,

    /// Replicate the remote exactly, including removals (the default).
    #[arg(long)]
    pub mirror: bool,

    /// Chunk size for removal lookups.
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Concurrent artifact downloads.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Retries per download on network errors and 5xx responses.
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,
}

pub fn run(cmd: RemoteCommand) -> Result<()> {
    match cmd {
        RemoteCommand::Add(args) => add(args),
        RemoteCommand::List { json } => list(json),
        RemoteCommand::Remove { name } => remove(&name),
    }
}

fn add(args: AddArgs) -> Result<()> {
    let home = home()?;
    let name = RemoteName::from(args.name.clone());
    let mut remote = remotes::add_remote_at(&home, name, args.url.clone())
        .with_context(|| format!("failed to add remote '{}'", args.name))?;

    if args.additive {
        remote.mirror = false;
    } else if args.mirror {
        remote.mirror = true;
    }
    if let Some(n) = args.batch_size {
        remote.batch_size = n;
    }
    if let Some(n) = args.workers {
        remote.download_workers = n;
    }
    if let Some(n) = args.retries {
        remote.retries = n;
    }
    remotes::save_remote_at(&home, &remote)
        .with_context(|| format!("failed to save remote '{}'", remote.name))?;

    println!("✓ Saved remote '{}'", remote.name);
    if remote.url.is_none() {
        println!(
            "  {} no --url given; set one before running `filemirror sync {}`",
            "!".yellow().bold(),
            remote.name
        );
    }
    Ok(())
}

#[derive(Tabled, Serialize)]
struct RemoteRow {
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "url")]
    url: String,
    #[tabled(rename = "mode")]
    mode: String,
    #[tabled(rename = "batch size")]
    batch_size: usize,
    #[tabled(rename = "workers")]
    workers: usize,
}

fn list(json: bool) -> Result<()> {
    let remotes = remotes::list_remotes_at(&home()?).context("failed to load remotes")?;
    let rows: Vec<RemoteRow> = remotes
        .into_iter()
        .map(|r| RemoteRow {
            name: r.name.0,
            url: r.url.unwrap_or_default(),
            mode: if r.mirror { "mirror" } else { "additive" }.to_string(),
            batch_size: r.batch_size,
            workers: r.download_workers,
        })
        .collect();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&rows).context("failed to serialize remotes")?
        );
        return Ok(());
    }
    if rows.is_empty() {
        println!("No remotes configured.");
        println!("Run: filemirror remote add <name> --url <manifest url>");
        return Ok(());
    }
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn remove(name: &str) -> Result<()> {
    remotes::remove_remote_at(&home()?, &RemoteName::from(name))
        .with_context(|| format!("failed to remove remote '{name}'"))?;
    println!("✓ Removed remote '{name}'");
    Ok(())
}
