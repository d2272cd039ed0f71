//! Drives CLI
//!
//! Mirror local directories and versioned drives into each other, and
//! inspect or edit single drives.

mod cli;
mod commands;
mod error;

use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use colored::Colorize;
use drive_core::{DriveStore, DrivesConfig, storage_location};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cli::{Cli, Commands};
use error::Result;

fn main() {
    if let Err(e) = run() {
        eprintln!("{}: {}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "drives", &mut std::io::stdout());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => DrivesConfig::load(path)?,
        None => DrivesConfig::default(),
    };
    let storage = storage_location(cli.storage.as_deref().or(config.storage.as_deref()))?;

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(execute_command(cli.command, storage, config))
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("{}: logging already initialized", "warning".yellow());
    }
    tracing::debug!("Verbose mode enabled");
}

async fn execute_command(cmd: Commands, storage: PathBuf, config: DrivesConfig) -> Result<()> {
    let store = DriveStore::new(storage);
    match cmd {
        Commands::Touch => commands::run_touch(&store).await,
        Commands::Mirror {
            src,
            dst,
            live,
            checkout,
            prefix,
            filter,
            dry_run,
        } => {
            let args = commands::MirrorArgs {
                src,
                dst,
                live,
                checkout,
                prefix,
                filter,
                dry_run,
            };
            commands::run_mirror(&store, args, config).await
        }
        Commands::Ls { drive, dir } => commands::run_ls(&store, &drive, &dir).await,
        Commands::Entry { drive, key, timeout } => commands::run_entry(&store, &drive, &key, timeout).await,
        Commands::Get { drive, key } => commands::run_get(&store, &drive, &key).await,
        Commands::Put { drive, key, content } => commands::run_put(&store, &drive, &key, &content).await,
        Commands::Rm { drive, key, recursive } => commands::run_rm(&store, &drive, &key, recursive).await,
        Commands::Info { drive } => commands::run_info(&store, &drive).await,
        Commands::List => commands::run_list(&store).await,
        Commands::Purge { key, yes } => commands::run_purge(&store, &key, yes).await,
        Commands::Completions { .. } => Ok(()),
    }
}
