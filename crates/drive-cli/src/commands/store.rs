//! Commands over the drive storage

use colored::Colorize;
use dialoguer::Confirm;
use drive_core::{DriveKey, DriveStore, ops};

use super::notice_storage;
use crate::error::Result;

/// Run the touch command
pub async fn run_touch(store: &DriveStore) -> Result<()> {
    notice_storage(store, &[]);
    let key = ops::touch(store).await?;
    println!("New drive: {}", key.encode().magenta());
    Ok(())
}

/// Run the list command
pub async fn run_list(store: &DriveStore) -> Result<()> {
    notice_storage(store, &[]);
    for key in ops::list(store).await? {
        println!("{}", key.encode());
    }
    Ok(())
}

/// Run the purge command
pub async fn run_purge(store: &DriveStore, key: &str, yes: bool) -> Result<()> {
    let key = DriveKey::decode(key)?;
    notice_storage(store, &[]);

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete the local copy of {}?", key.encode()))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("{}", "Aborted.".dimmed());
            return Ok(());
        }
    }

    println!("Deleting drive...");
    if ops::purge(store, &key).await? {
        println!("{}", "Drive deleted.".green());
    } else {
        println!("{}", "Drive not found.".red());
    }
    Ok(())
}
