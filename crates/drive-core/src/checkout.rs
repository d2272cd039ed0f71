//! Point-in-time checkouts

use crate::drive::Drive;
use crate::{Error, Result};

/// Parse a user-supplied version. Versions are positive integers.
pub fn parse_version(value: &str) -> Result<u64> {
    let version: u64 = value.trim().parse().map_err(|_| Error::InvalidVersion {
        value: value.to_string(),
        reason: "not an integer".into(),
    })?;
    validate_version(version)
}

pub fn validate_version(version: u64) -> Result<u64> {
    if version == 0 {
        return Err(Error::InvalidVersion {
            value: version.to_string(),
            reason: "must be a positive integer".into(),
        });
    }
    Ok(version)
}

/// Read-only view of `drive` at `version`.
///
/// The view is released independently of `drive`.
pub fn checkout(drive: &Drive, version: u64) -> Result<Drive> {
    drive.checkout(validate_version(version)?)
}
