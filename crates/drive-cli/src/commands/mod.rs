//! Command implementations for drive-cli

pub mod drive;
pub mod mirror;
pub mod store;

pub use drive::{run_entry, run_get, run_info, run_ls, run_put, run_rm};
pub use mirror::{MirrorArgs, run_mirror};
pub use store::{run_list, run_purge, run_touch};

use colored::Colorize;
use drive_core::{Drive, DriveOps, DriveStore, StorageNotice, storage_notice};

use crate::error::Result;

/// Print where keyed drives live, when any of `identifiers` needs the store.
///
/// Commands that always use the store pass no identifiers.
pub(crate) fn notice_storage(store: &DriveStore, identifiers: &[Option<&str>]) {
    match storage_notice(store.root(), identifiers) {
        Some(notice @ StorageNotice::Existing(_)) => println!("{}", notice.to_string().dimmed()),
        Some(notice @ StorageNotice::New(_)) => println!("{}", notice.to_string().red()),
        None => {}
    }
}

/// Resolve and ready a drive named on the command line.
pub(crate) async fn open_drive(store: &DriveStore, identifier: &str) -> Result<Drive> {
    notice_storage(store, &[Some(identifier)]);
    let drive = store.resolve(Some(identifier)).await?;
    drive.ready().await?;
    Ok(drive)
}
