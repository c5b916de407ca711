//! `filemirror repo create|list`

use anyhow::{Context, Result};
use clap::Subcommand;
use tabled::{settings::Style, Table, Tabled};

use filemirror_core::{types::RepositoryName, Store};

use super::home;

/// Manage local repositories.
#[derive(Subcommand, Debug)]
pub enum RepoCommand {
    /// Create an empty repository.
    Create {
        /// Repository name.
        name: String,
    },

    /// List repositories with their latest version.
    List,
}

pub fn run(cmd: RepoCommand) -> Result<()> {
    let store = Store::open_at(&home()?);
    match cmd {
        RepoCommand::Create { name } => create(&store, &name),
        RepoCommand::List => list(&store),
    }
}

fn create(store: &Store, name: &str) -> Result<()> {
    let created = store
        .create_repository(&RepositoryName::from(name))
        .with_context(|| format!("failed to create repository '{name}'"))?;
    if created {
        println!("✓ Created repository '{name}'");
    } else {
        println!("✓ Repository '{name}' already exists");
    }
    Ok(())
}

#[derive(Tabled)]
struct RepoRow {
    #[tabled(rename = "repository")]
    name: String,
    #[tabled(rename = "latest")]
    latest: String,
    #[tabled(rename = "units")]
    units: usize,
    #[tabled(rename = "created")]
    created: String,
}

fn list(store: &Store) -> Result<()> {
    let names = store.list_repositories().context("failed to list repositories")?;
    if names.is_empty() {
        println!("No repositories.");
        println!("Run: filemirror repo create <name>  or  filemirror sync <remote>");
        return Ok(());
    }

    let mut rows = Vec::with_capacity(names.len());
    for name in names {
        let latest = store
            .latest(&name)
            .with_context(|| format!("failed to read versions of '{name}'"))?;
        rows.push(match latest {
            Some(v) => RepoRow {
                name: name.0,
                latest: v.number.to_string(),
                units: v.len(),
                created: v.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            },
            None => RepoRow {
                name: name.0,
                latest: "-".to_string(),
                units: 0,
                created: "never synced".to_string(),
            },
        });
    }
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}
