//! [`TestDir`] builder for mirror scenarios.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary directory holding named trees, such as `src`, `dst` and a
/// `store`, with helpers for seeding and asserting on them.
///
/// # Example
///
/// ```rust,no_run
/// use drive_test_utils::TestDir;
///
/// let dir = TestDir::new();
/// dir.write("src/init-file.txt", "Just an initial file");
/// dir.assert_file_contains("src/init-file.txt", "initial");
/// ```
pub struct TestDir {
    temp_dir: TempDir,
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

impl TestDir {
    /// Create an empty temporary directory.
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    /// Return the root path of the temporary directory.
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Absolute path of `relative` below the root. Nothing is created.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.root().join(relative)
    }

    /// Same as [`path`](Self::path), as a string for identifier arguments.
    pub fn arg(&self, relative: &str) -> String {
        self.path(relative).to_string_lossy().into_owned()
    }

    /// Write `content` to `relative`, creating parent directories.
    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    /// Write an executable file.
    #[cfg(unix)]
    pub fn write_executable(&self, relative: &str, content: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = self.write(relative, content);
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Create a symlink at `relative` pointing to `target`.
    #[cfg(unix)]
    pub fn symlink(&self, relative: &str, target: &str) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        std::os::unix::fs::symlink(target, &path).unwrap();
        path
    }

    /// Create an empty directory.
    pub fn mkdir(&self, relative: &str) -> PathBuf {
        let path = self.path(relative);
        fs::create_dir_all(&path).unwrap();
        path
    }

    /// Remove a file.
    pub fn remove(&self, relative: &str) {
        fs::remove_file(self.path(relative)).unwrap();
    }

    /// Read a file to a string.
    pub fn read(&self, relative: &str) -> String {
        let path = self.path(relative);
        fs::read_to_string(&path).unwrap_or_else(|_| panic!("Could not read file: {}", path.display()))
    }

    /// Every regular file below `relative`, keyed by its `/`-separated path
    /// relative to that directory. A missing directory is empty.
    pub fn files(&self, relative: &str) -> BTreeMap<String, Vec<u8>> {
        let base = self.path(relative);
        let mut out = BTreeMap::new();
        let mut pending = vec![base.clone()];
        while let Some(dir) = pending.pop() {
            let Ok(reader) = fs::read_dir(&dir) else {
                continue;
            };
            for child in reader {
                let child = child.unwrap();
                let path = child.path();
                let file_type = child.file_type().unwrap();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    let key = path
                        .strip_prefix(&base)
                        .unwrap()
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/");
                    out.insert(key, fs::read(&path).unwrap());
                }
            }
        }
        out
    }

    /// Assert that `path` (relative to the root) exists.
    ///
    /// # Panics
    /// Panics with a descriptive message if the path does not exist.
    pub fn assert_file_exists(&self, path: &str) {
        let full_path = self.path(path);
        assert!(
            full_path.exists(),
            "Expected file to exist: {}",
            full_path.display()
        );
    }

    /// Assert that `path` (relative to the root) does **not** exist.
    ///
    /// # Panics
    /// Panics with a descriptive message if the path exists.
    pub fn assert_file_not_exists(&self, path: &str) {
        let full_path = self.path(path);
        assert!(
            !full_path.exists(),
            "Expected file NOT to exist: {}",
            full_path.display()
        );
    }

    /// Assert that the file at `path` (relative to the root) contains `content`.
    ///
    /// # Panics
    /// Panics if the file cannot be read or does not contain `content`.
    pub fn assert_file_contains(&self, path: &str, content: &str) {
        let file_content = self.read(path);
        assert!(
            file_content.contains(content),
            "File {} does not contain expected content.\nExpected: {}\nActual: {}",
            self.path(path).display(),
            content,
            file_content
        );
    }

    /// Assert that two directories hold the same regular files.
    pub fn assert_same_files(&self, left: &str, right: &str) {
        let (a, b) = (self.files(left), self.files(right));
        assert_eq!(
            a.keys().collect::<Vec<_>>(),
            b.keys().collect::<Vec<_>>(),
            "File sets of {left} and {right} differ"
        );
        for (key, content) in &a {
            assert_eq!(content, &b[key], "Content of {key} differs between {left} and {right}");
        }
    }
}
