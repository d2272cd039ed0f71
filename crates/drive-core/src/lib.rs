//! Mirroring and live synchronization engine for drives
//!
//! A drive is a tree of entries addressed by normalized keys, backed either by
//! a local directory or by a versioned, content-addressed tree in a
//! [`DriveStore`]. This crate compares two drives and brings the destination
//! in line with the source:
//!
//! - **Drive handles**: one [`Drive`] enum over both backends, behind the
//!   [`DriveOps`] capability trait
//! - **Filtering**: control paths are always excluded, user globs on top
//! - **Equality**: metadata first, then checksums, then content streams
//! - **Mirror passes**: ordered add/change/remove events with per-key
//!   error recovery
//! - **Checkouts**: immutable views of a versioned tree
//! - **Watching**: filesystem and tree notifications as trigger batches
//! - **Sessions**: one full pass, then coalesced live passes until cancelled
//!
//! # Architecture
//!
//! ```text
//!                 drive-cli
//!                     |
//!                drive-core
//!       +-------+-----+------+-------+
//!       |       |            |       |
//!     sync -> mirror -> equality   watch
//!       |       |
//!       +---> drive (local | keyed)
//!                     |
//!                  drive-fs
//! ```
//!
//! # Example
//!
//! ```ignore
//! use drive_core::{DriveStore, LogObserver, MirrorOptions, MirrorSession, WatchConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn example(store: &DriveStore) -> drive_core::Result<()> {
//!     let session = MirrorSession::open(
//!         store,
//!         "./site",
//!         None,
//!         &MirrorOptions::default(),
//!         WatchConfig::default(),
//!     )
//!     .await?;
//!     session.run(&LogObserver, CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod checkout;
pub mod config;
pub mod drive;
pub mod entry;
pub mod equality;
pub mod error;
pub mod filter;
pub mod mirror;
pub mod ops;
pub mod report;
pub mod sync;
pub mod watch;

pub use checkout::{checkout, parse_version};
pub use config::{DrivesConfig, MirrorOptions, ValidatedMirror, WatchConfig};
pub use drive::{
    Drive, DriveId, DriveKey, DriveOps, DriveStore, EntryOptions, KeyedDrive, LocalDrive,
    StorageNotice, WriteOptions, storage_location, storage_notice,
};
pub use entry::{Blob, Count, DiffEvent, DiffOp, Entry};
pub use equality::same;
pub use error::{Error, Result};
pub use filter::Filter;
pub use mirror::{Mirror, PassOptions, apply_key, mirror};
pub use report::{LogObserver, MirrorObserver, RecordingObserver, Summary};
pub use sync::{MirrorSession, SessionReport, SyncState};
pub use watch::{Subscription, TriggerBatch, WatchOptions, subscribe};

pub use drive_fs::KeyPath;
