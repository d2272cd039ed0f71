//! Normalized drive keys
//!
//! Every entry in a drive is addressed by an absolute POSIX-style path such as
//! `/docs/readme.md`. Keys are normalized once on construction so that
//! comparisons, prefix checks and ordering are plain string operations.

use std::path::{Component, Path, PathBuf};

/// An absolute, normalized drive key.
///
/// Always starts with `/`, never ends with `/` (except the root itself),
/// uses forward slashes only and contains no `.`/`..` segments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyPath {
    inner: String,
}

impl KeyPath {
    /// The root key `/`.
    pub fn root() -> Self {
        Self {
            inner: "/".to_string(),
        }
    }

    /// Resolve any key-like input against the root.
    ///
    /// Backslashes become forward slashes, empty and `.` segments are dropped
    /// and `..` pops a segment (never above the root).
    pub fn new(key: impl AsRef<str>) -> Self {
        let raw = key.as_ref().replace('\\', "/");
        let mut segments: Vec<&str> = Vec::new();

        for segment in raw.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other),
            }
        }

        Self {
            inner: format!("/{}", segments.join("/")),
        }
    }

    /// Build a key from a native path below `root`.
    ///
    /// Returns `None` if `path` is not inside `root`.
    pub fn from_native(root: &Path, path: &Path) -> Option<Self> {
        let relative = path.strip_prefix(root).ok()?;
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => segments.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(Self {
            inner: format!("/{}", segments.join("/")),
        })
    }

    /// Get the internal normalized string representation.
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Whether this is the root key.
    pub fn is_root(&self) -> bool {
        self.inner == "/"
    }

    /// Join this key with a relative segment.
    pub fn join(&self, segment: &str) -> Self {
        Self::new(format!("{}/{}", self.inner, segment))
    }

    /// Get the parent key, `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.inner.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self {
                inner: self.inner[..idx].to_string(),
            }),
            None => None,
        }
    }

    /// Get the last segment.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.inner.rsplit('/').next()
    }

    /// Whether `self` equals `prefix` or lives below it.
    pub fn is_within(&self, prefix: &KeyPath) -> bool {
        if prefix.is_root() {
            return true;
        }
        match self.inner.strip_prefix(prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Ancestor directories from the outermost down, excluding the root and
    /// the key itself (`/a/b/c` yields `/a`, `/a/b`).
    pub fn ancestors(&self) -> Vec<KeyPath> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(dir) = current {
            if dir.is_root() {
                break;
            }
            current = dir.parent();
            out.push(dir);
        }
        out.reverse();
        out
    }

    /// Map this key to a native path below `root`.
    pub fn to_native(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for segment in self.inner.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }
}

impl Default for KeyPath {
    fn default() -> Self {
        Self::root()
    }
}

impl AsRef<str> for KeyPath {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

impl std::fmt::Display for KeyPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl From<&str> for KeyPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for KeyPath {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_of_top_level_is_root() {
        assert_eq!(KeyPath::new("/a").parent(), Some(KeyPath::root()));
        assert_eq!(KeyPath::root().parent(), None);
    }

    #[test]
    fn ancestors_skip_root_and_self() {
        let ancestors: Vec<String> = KeyPath::new("/a/b/c.txt")
            .ancestors()
            .into_iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(ancestors, vec!["/a", "/a/b"]);
    }

    #[test]
    fn from_native_rejects_outside_paths() {
        let root = Path::new("/tmp/drive");
        assert_eq!(
            KeyPath::from_native(root, Path::new("/tmp/drive/x/y")),
            Some(KeyPath::new("/x/y"))
        );
        assert_eq!(KeyPath::from_native(root, Path::new("/tmp/other")), None);
    }
}
