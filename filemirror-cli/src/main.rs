//! filemirror: mirror remote file repositories into versioned local storage.
//!
//! # Usage
//!
//! ```text
//! filemirror remote add <name> --url <url> [--additive] [--batch-size N] [--workers N]
//! filemirror remote list [--json]
//! filemirror remote remove <name>
//! filemirror repo create <name>
//! filemirror repo list
//! filemirror sync <remote> [--repository <name>] [--additive] [--batch-size N] [--dry-run]
//! filemirror version list <repository> [--json]
//! filemirror version show <repository> [<number>] [--json]
//! filemirror version export <repository> <dest> [--number N]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    remote::RemoteCommand, repo::RepoCommand, sync::SyncArgs, version::VersionCommand,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "filemirror",
    version,
    about = "Mirror remote file repositories into versioned local storage",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage remote definitions (manifest URL and sync settings).
    Remote {
        #[command(subcommand)]
        command: RemoteCommand,
    },

    /// Manage local repositories.
    Repo {
        #[command(subcommand)]
        command: RepoCommand,
    },

    /// Synchronize a remote into a new repository version.
    Sync(SyncArgs),

    /// Inspect and export repository versions.
    Version {
        #[command(subcommand)]
        command: VersionCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Remote { command } => commands::remote::run(command),
        Commands::Repo { command } => commands::repo::run(command),
        Commands::Sync(args) => args.run(),
        Commands::Version { command } => commands::version::run(command),
    }
}

/// Log to stderr so `--json` output on stdout stays parseable.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
