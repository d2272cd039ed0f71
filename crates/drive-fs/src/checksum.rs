//! SHA-256 checksum utilities
//!
//! Provides a single canonical checksum format (`sha256:<hex>`) used to
//! content-address blobs and to compare file contents.

use sha2::{Digest, Sha256};

/// Prefix for all checksums produced by this module
const PREFIX: &str = "sha256:";

/// Strip the `sha256:` prefix, returning the bare hex digest.
pub fn digest_hex(checksum: &str) -> Option<&str> {
    let hex = checksum.strip_prefix(PREFIX)?;
    if hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(hex)
    } else {
        None
    }
}

/// Incremental hasher for content that arrives in chunks.
#[derive(Default)]
pub struct ChecksumHasher {
    inner: Sha256,
    len: u64,
}

impl ChecksumHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// Bytes hashed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finish(self) -> String {
        format!("{}{:x}", PREFIX, self.inner.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checksum_of(content: &[u8]) -> String {
        let mut hasher = ChecksumHasher::new();
        hasher.update(content);
        hasher.finish()
    }

    #[test]
    fn content_checksum_known_value() {
        assert_eq!(
            checksum_of(b"hello world"),
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn chunked_hash_matches_whole() {
        let mut hasher = ChecksumHasher::new();
        assert!(hasher.is_empty());
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.len(), 11);
        assert_eq!(hasher.finish(), checksum_of(b"hello world"));
    }

    #[test]
    fn digest_hex_requires_prefix_and_length() {
        let checksum = checksum_of(b"x");
        assert_eq!(digest_hex(&checksum).map(str::len), Some(64));
        assert_eq!(digest_hex("md5:abc"), None);
        assert_eq!(digest_hex("sha256:xyz"), None);
    }
}
