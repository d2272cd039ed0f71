//! CLI argument parsing using clap derive

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Drives - Mirror directories and versioned drives into each other
#[derive(Parser, Debug)]
#[command(name = "drives")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Storage directory for keyed drives (default ~/.drives/corestore)
    #[arg(long, global = true, env = "DRIVES_STORAGE")]
    pub storage: Option<PathBuf>,

    /// Configuration file (TOML, JSON or YAML)
    #[arg(long, global = true, env = "DRIVES_CONFIG")]
    pub config: Option<PathBuf>,

    /// The command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Create a writable drive and print its key
    Touch,

    /// Mirror a drive into another drive
    ///
    /// Drives are directories or keys. Without a destination a new drive is
    /// created.
    ///
    /// Examples:
    ///   drives mirror ./site                 # into a new drive
    ///   drives mirror ./site <key> --live    # keep mirroring
    ///   drives mirror <key> ./out --version 3
    Mirror {
        /// Source drive (key or path)
        src: String,

        /// Destination drive (key or path)
        dst: Option<String>,

        /// Keep mirroring as the source changes
        #[arg(long)]
        live: bool,

        /// Mirror the source as it was at this version
        #[arg(long = "version", value_name = "V")]
        checkout: Option<String>,

        /// Only mirror keys below this path
        #[arg(long)]
        prefix: Option<String>,

        /// Glob patterns to exclude
        #[arg(long, num_args = 1..)]
        filter: Vec<String>,

        /// Show what would change without changing it
        #[arg(long)]
        dry_run: bool,
    },

    /// List one directory of a drive
    Ls {
        /// Drive (key or path)
        drive: String,

        /// Directory to list
        #[arg(default_value = "/")]
        dir: String,
    },

    /// Show the entry of a key
    Entry {
        /// Drive (key or path)
        drive: String,

        /// Key to look up
        key: String,

        /// Lookup timeout in milliseconds
        #[arg(long, default_value_t = 15000)]
        timeout: u64,
    },

    /// Print the content of a key
    Get {
        /// Drive (key or path)
        drive: String,

        /// Key to read
        key: String,
    },

    /// Write content to a key
    Put {
        /// Drive (key or path)
        drive: String,

        /// Key to write
        key: String,

        /// Content to store
        content: String,
    },

    /// Delete a key
    Rm {
        /// Drive (key or path)
        drive: String,

        /// Key to delete
        key: String,

        /// Delete every key below it
        #[arg(short, long)]
        recursive: bool,
    },

    /// Show information about a drive
    Info {
        /// Drive (key or path)
        drive: String,
    },

    /// List drives in the storage
    List,

    /// Delete the local storage of a drive
    Purge {
        /// Drive key
        key: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Generate shell completions
    ///
    /// Examples:
    ///   drives completions bash > ~/.local/share/bash-completion/completions/drives
    ///   drives completions zsh > ~/.zfunc/_drives
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
