//! Typed configuration
//!
//! [`MirrorOptions`] is the raw option set a caller supplies; validating it
//! yields a [`ValidatedMirror`] the session runs with. [`DrivesConfig`] groups
//! the options that can be kept in a config file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use drive_fs::{ConfigStore, KeyPath};
use serde::{Deserialize, Serialize};

use crate::checkout::validate_version;
use crate::filter::Filter;
use crate::mirror::PassOptions;
use crate::watch::WatchOptions;
use crate::Result;

/// Default bound on a single entry lookup.
pub const DEFAULT_ENTRY_TIMEOUT: Duration = Duration::from_secs(15);

/// Options of one mirror session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MirrorOptions {
    /// Only mirror keys below this path (default `/`)
    pub prefix: Option<String>,
    /// Glob patterns to exclude
    pub filter: Vec<String>,
    pub dry_run: bool,
    /// Keep mirroring as the source changes
    pub live: bool,
    /// Mirror the source as it was at this version
    pub version: Option<u64>,
    /// Entry lookup bound in milliseconds, 0 for none
    pub entry_timeout_ms: Option<u64>,
}

/// Options that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedMirror {
    pub pass: PassOptions,
    pub live: bool,
    pub version: Option<u64>,
}

impl MirrorOptions {
    /// Check every option before any drive is opened.
    pub fn validate(&self) -> Result<ValidatedMirror> {
        let prefix = match self.prefix.as_deref() {
            None | Some("") => KeyPath::root(),
            Some(raw) => KeyPath::new(raw),
        };
        let filter = Filter::compile(&self.filter)?;
        let version = self.version.map(validate_version).transpose()?;
        let entry_timeout = match self.entry_timeout_ms {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => Some(DEFAULT_ENTRY_TIMEOUT),
        };

        Ok(ValidatedMirror {
            pass: PassOptions {
                prefix,
                filter,
                dry_run: self.dry_run,
                entry_timeout,
            },
            live: self.live,
            version,
        })
    }
}

/// Watch tuning for live sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct WatchConfig {
    /// Apply exact changed keys instead of re-walking on every change
    pub incremental: bool,
    pub channel_capacity: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            incremental: true,
            channel_capacity: 64,
        }
    }
}

impl WatchConfig {
    pub fn options(&self) -> WatchOptions {
        WatchOptions {
            eager_open: true,
            incremental: self.incremental,
            capacity: self.channel_capacity,
        }
    }
}

/// File-backed configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrivesConfig {
    /// Storage directory for keyed drives
    pub storage: Option<PathBuf>,
    pub mirror: MirrorOptions,
    pub watch: WatchConfig,
}

impl DrivesConfig {
    /// Load from a TOML, JSON or YAML file, chosen by extension.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(ConfigStore::new().load(path)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        Ok(ConfigStore::new().save(path, self)?)
    }
}
