//! Commands on a single drive

use std::time::Duration;

use colored::Colorize;
use drive_core::ops::{self, EntryKind, ListedEntry};
use drive_core::report::format_bytes;
use drive_core::{DriveStore, Error as CoreError, KeyPath, WriteOptions};

use super::open_drive;
use crate::error::Result;

/// Run the ls command
pub async fn run_ls(store: &DriveStore, identifier: &str, dir: &str) -> Result<()> {
    let drive = open_drive(store, identifier).await?;
    for listed in ops::ls(&drive, &KeyPath::new(dir)).await? {
        println!("{}", paint(&listed));
    }
    Ok(())
}

fn paint(listed: &ListedEntry) -> String {
    let line = listed.to_string();
    match &listed.kind {
        EntryKind::File { .. } => line,
        EntryKind::Executable { .. } => line.green().bold().to_string(),
        EntryKind::Symlink { dangling: true, .. } => line.red().to_string(),
        EntryKind::Symlink { .. } => line.cyan().to_string(),
        EntryKind::Directory => line.blue().bold().to_string(),
    }
}

/// Run the entry command
pub async fn run_entry(store: &DriveStore, identifier: &str, key: &str, timeout_ms: u64) -> Result<()> {
    let drive = open_drive(store, identifier).await?;
    let key = KeyPath::new(key);
    let found = match ops::entry(&drive, &key, Some(Duration::from_millis(timeout_ms))).await {
        Ok(found) => found,
        Err(CoreError::EntryLookupTimeout { .. }) => {
            println!("{}", "Entry timeout.".red());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let Some(entry) = found else {
        println!("{}", "Entry not found.".red());
        return Ok(());
    };

    println!("Sequence: {}", entry.seq.to_string().yellow());
    println!("Key: {}", entry.key.green());
    println!("Executable? {}", entry.executable.to_string().yellow());
    match &entry.linkname {
        Some(target) => println!("Linkname: {}", target.cyan()),
        None => println!("{}", "Linkname: null".dimmed()),
    }
    match &entry.blob {
        Some(blob) => {
            let size = format_bytes(i64::try_from(blob.byte_length).unwrap_or(i64::MAX));
            println!("Blob size: {}", size.yellow());
        }
        None => println!("{}", "Blob: null".dimmed()),
    }
    match &entry.metadata {
        Some(metadata) => println!("Metadata: {}", serde_json::to_string(metadata).unwrap_or_default()),
        None => println!("{}", "Metadata: null".dimmed()),
    }
    Ok(())
}

/// Run the get command
pub async fn run_get(store: &DriveStore, identifier: &str, key: &str) -> Result<()> {
    let drive = open_drive(store, identifier).await?;
    match ops::get(&drive, &KeyPath::new(key)).await? {
        Some(content) => println!("{}", String::from_utf8_lossy(&content)),
        None => println!("{}", "Blob not found.".red()),
    }
    Ok(())
}

/// Run the put command
pub async fn run_put(store: &DriveStore, identifier: &str, key: &str, content: &str) -> Result<()> {
    let drive = open_drive(store, identifier).await?;
    if ops::put(&drive, &KeyPath::new(key), content.as_bytes(), WriteOptions::default())
        .await?
        .is_some()
    {
        println!("{}", "File saved.".green());
    }
    Ok(())
}

/// Run the rm command
pub async fn run_rm(store: &DriveStore, identifier: &str, key: &str, recursive: bool) -> Result<()> {
    let drive = open_drive(store, identifier).await?;
    match ops::rm(&drive, &KeyPath::new(key), recursive).await? {
        0 => println!("{}", "Nothing deleted.".dimmed()),
        1 => println!("{}", "File deleted.".green()),
        n => println!("{}", format!("{n} files deleted.").green()),
    }
    Ok(())
}

/// Run the info command
pub async fn run_info(store: &DriveStore, identifier: &str) -> Result<()> {
    let drive = open_drive(store, identifier).await?;
    let info = ops::info(&drive).await?;
    let label = if drive.key().is_some() { "Key" } else { "Path" };
    println!("{}: {}", label, info.id.magenta());
    println!("Version: {}", info.version);
    println!("Writable? {}", info.writable);
    println!("Files: {}", info.entries.to_string().yellow());
    let size = format_bytes(i64::try_from(info.blob_bytes).unwrap_or(i64::MAX));
    println!("Drive size: {}", size.cyan());
    Ok(())
}
