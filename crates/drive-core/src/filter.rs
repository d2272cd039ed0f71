//! Path filtering
//!
//! A [`Filter`] always excludes internal and control paths (version control
//! directories, lockfiles, drive storage) and can additionally exclude keys
//! matching user glob patterns.

use std::sync::LazyLock;

use drive_fs::KeyPath;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use regex::Regex;

use crate::{Error, Result};

/// Control paths excluded at any depth.
static DEFAULT_EXCLUSIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)/(\.drives|\.git|\.github|\.DS_Store|package-lock\.json|node_modules/\.package-lock\.json|corestore)(/|$)",
    )
    .unwrap()
});

/// Compiled exclusion predicate over drive keys.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    custom: Option<GlobSet>,
    patterns: Vec<String>,
}

impl Filter {
    /// Compile user patterns on top of the default exclusions.
    ///
    /// Patterns without a leading `/` match at any depth. Matching is
    /// case-insensitive; `*` and `?` stay within one path segment and `**`
    /// spans segments.
    pub fn compile(patterns: &[String]) -> Result<Self> {
        if patterns.is_empty() {
            return Ok(Self::default());
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(compile_glob(pattern)?);
        }
        let set = builder.build().map_err(|e| Error::InvalidFilterList {
            pattern: patterns.join(", "),
            reason: e.to_string(),
        })?;

        Ok(Self {
            custom: Some(set),
            patterns: patterns.to_vec(),
        })
    }

    /// User patterns this filter was compiled from.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether `key` should be synchronized.
    ///
    /// A key is excluded when it or any ancestor directory matches.
    pub fn allows(&self, key: &KeyPath) -> bool {
        if key.is_root() {
            return true;
        }
        if is_excluded_by_default(key) {
            return false;
        }
        let Some(set) = &self.custom else {
            return true;
        };
        if set.is_match(relative(key)) {
            return false;
        }
        !key.ancestors().iter().any(|dir| set.is_match(relative(dir)))
    }
}

/// Whether `key` is one of the always-excluded control paths.
pub fn is_excluded_by_default(key: &KeyPath) -> bool {
    DEFAULT_EXCLUSIONS.is_match(key.as_str())
}

/// Globs are compiled and matched without the leading `/`.
fn relative(key: &KeyPath) -> &str {
    key.as_str().trim_start_matches('/')
}

fn compile_glob(pattern: &str) -> Result<globset::Glob> {
    let trimmed = pattern.trim();
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() || trimmed == "/" {
        return Err(Error::InvalidFilterList {
            pattern: pattern.to_string(),
            reason: "empty pattern".into(),
        });
    }

    let glob = match trimmed.strip_prefix('/') {
        Some(anchored) => anchored.to_string(),
        None => format!("**/{trimmed}"),
    };

    GlobBuilder::new(&glob)
        .case_insensitive(true)
        .literal_separator(true)
        .build()
        .map_err(|e| Error::InvalidFilterList {
            pattern: pattern.to_string(),
            reason: e.kind().to_string(),
        })
}
