//! Filesystem primitives for drives
//!
//! Provides normalized drive keys, atomic writes, checksums and
//! format-agnostic configuration loading.

pub mod checksum;
pub mod config;
pub mod constants;
pub mod error;
pub mod io;
pub mod path;

pub use checksum::ChecksumHasher;
pub use config::ConfigStore;
pub use constants::StorePath;
pub use error::{Error, Result};
pub use path::KeyPath;
