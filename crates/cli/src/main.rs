//! Settle CLI - settle command

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;
mod util;

/// Settle - Observe file changes once they are complete, write files atomically
#[derive(Parser)]
#[command(name = "settle")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log detector activity to stderr (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch files or a directory and print change events
    Watch {
        /// Files to watch
        #[arg(required_unless_present = "dir", conflicts_with = "dir")]
        paths: Vec<PathBuf>,

        /// Watch the files of a directory instead
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Only report directory entries ending with this suffix (e.g. .yaml)
        #[arg(short, long, requires = "dir")]
        suffix: Option<String>,

        /// Include subdirectories
        #[arg(short, long, requires = "dir")]
        recursive: bool,

        /// Detector configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Disable native notifications and rely on polling
        #[arg(long)]
        poll_only: bool,

        /// Only print events for files that finished changing
        #[arg(long)]
        complete_only: bool,

        /// Print one JSON object per event
        #[arg(long)]
        json: bool,

        /// Report recognised operations (atomic saves, batches) instead of file events
        #[arg(long, requires = "dir", conflicts_with_all = ["poll_only", "complete_only", "suffix"])]
        operations: bool,
    },
    /// Atomically write stdin (or a file) to a path
    Write {
        /// Target file
        path: PathBuf,

        /// Read content from this file instead of stdin
        #[arg(long)]
        from: Option<PathBuf>,

        /// Create missing parent directories
        #[arg(short, long)]
        parents: bool,

        /// Octal permission bits for the result (e.g. 600)
        #[arg(short, long)]
        mode: Option<String>,

        /// Keep the previous content as <name>.bak
        #[arg(long)]
        backup: bool,

        /// Fail unless the target already exists
        #[arg(long)]
        replace: bool,
    },
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Watch {
            paths,
            dir,
            suffix,
            recursive,
            config,
            poll_only,
            complete_only,
            json,
            operations,
        } => {
            cmd::watch::run(cmd::watch::WatchArgs {
                paths,
                dir,
                suffix,
                recursive,
                config,
                poll_only,
                complete_only,
                json,
                operations,
            })
            .await
        }
        Commands::Write {
            path,
            from,
            parents,
            mode,
            backup,
            replace,
        } => cmd::write::run(&path, from.as_deref(), parents, mode.as_deref(), backup, replace),
    }
}
