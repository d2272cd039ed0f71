//! Drive identifiers
//!
//! A drive is named either by a filesystem path or by a 32-byte public key.
//! Keys are printed in z-base-32 (52 characters); 64-character hex is also
//! accepted on input.

use std::path::PathBuf;

use sha2::{Digest, Sha256};

use crate::{Error, Result};

const ZBASE32_ALPHABET: &[u8; 32] = b"ybndrfg8ejkmcpqxot1uwisza345h769";

/// Length of a z-base-32 encoded key.
pub const ZBASE32_KEY_LEN: usize = 52;

/// Length of a hex encoded key.
pub const HEX_KEY_LEN: usize = 64;

/// 32-byte public key of a keyed drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DriveKey([u8; 32]);

impl DriveKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Fresh random key.
    pub fn generate() -> Self {
        let seed = uuid::Uuid::new_v4();
        let digest = Sha256::digest(seed.as_bytes());
        Self(digest.into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Canonical z-base-32 form.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(ZBASE32_KEY_LEN);
        let mut buffer: u32 = 0;
        let mut bits = 0u32;
        for &byte in &self.0 {
            buffer = (buffer << 8) | u32::from(byte);
            bits += 8;
            while bits >= 5 {
                bits -= 5;
                out.push(ZBASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
            }
        }
        if bits > 0 {
            out.push(ZBASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
        }
        out
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Decode a z-base-32 or hex key.
    pub fn decode(identifier: &str) -> Result<Self> {
        match identifier.len() {
            ZBASE32_KEY_LEN => decode_zbase32(identifier),
            HEX_KEY_LEN => {
                let bytes = hex::decode(identifier).map_err(|e| invalid(identifier, e.to_string()))?;
                let array: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| invalid(identifier, "expected 32 bytes"))?;
                Ok(Self(array))
            }
            n => Err(invalid(
                identifier,
                format!("expected {ZBASE32_KEY_LEN} or {HEX_KEY_LEN} characters, got {n}"),
            )),
        }
    }
}

impl std::fmt::Display for DriveKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

fn invalid(identifier: &str, reason: impl Into<String>) -> Error {
    Error::InvalidIdentifier {
        identifier: identifier.to_string(),
        reason: reason.into(),
    }
}

fn decode_zbase32(identifier: &str) -> Result<DriveKey> {
    let mut out = [0u8; 32];
    let mut filled = 0usize;
    let mut buffer: u32 = 0;
    let mut bits = 0u32;

    for ch in identifier.bytes() {
        let value = ZBASE32_ALPHABET
            .iter()
            .position(|&c| c == ch.to_ascii_lowercase())
            .ok_or_else(|| invalid(identifier, format!("unexpected character {:?}", ch as char)))?;
        buffer = (buffer << 5) | value as u32;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            if filled == out.len() {
                return Err(invalid(identifier, "too many bits"));
            }
            out[filled] = ((buffer >> bits) & 0xff) as u8;
            filled += 1;
        }
    }

    // 52 * 5 = 260 bits: 32 bytes plus 4 padding bits that must be zero
    if filled != out.len() || buffer & ((1 << bits) - 1) != 0 {
        return Err(invalid(identifier, "non-canonical encoding"));
    }
    Ok(DriveKey(out))
}

/// How a user-supplied drive identifier should be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveId {
    /// Local directory
    Path(PathBuf),
    /// Existing keyed drive
    Key(String),
    /// Create a new keyed drive
    New,
}

impl DriveId {
    /// Classify an identifier.
    ///
    /// Empty or absent means a new drive. Anything containing `/` or `.` is a
    /// path. Strings of key length are keys. Everything else is a path.
    pub fn classify(identifier: Option<&str>) -> Self {
        let Some(id) = identifier.filter(|s| !s.is_empty()) else {
            return Self::New;
        };
        if id.contains('/') || id.contains('.') {
            return Self::Path(PathBuf::from(id));
        }
        if is_key_like(id) {
            return Self::Key(id.to_string());
        }
        Self::Path(PathBuf::from(id))
    }

    pub fn is_key(&self) -> bool {
        !matches!(self, Self::Path(_))
    }
}

/// Whether `id` has the length of an encoded key.
pub fn is_key_like(id: &str) -> bool {
    id.len() == ZBASE32_KEY_LEN || id.len() == HEX_KEY_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_52_chars_of_alphabet() {
        let key = DriveKey::generate();
        let encoded = key.encode();
        assert_eq!(encoded.len(), ZBASE32_KEY_LEN);
        assert!(encoded.bytes().all(|b| ZBASE32_ALPHABET.contains(&b)));
        assert_eq!(DriveKey::decode(&encoded).unwrap(), key);
    }

    #[test]
    fn zero_key_encodes_to_first_letter() {
        let key = DriveKey::from_bytes([0u8; 32]);
        assert_eq!(key.encode(), "y".repeat(52));
    }

    #[test]
    fn hex_is_accepted() {
        let key = DriveKey::generate();
        assert_eq!(DriveKey::decode(&key.to_hex()).unwrap(), key);
    }

    #[test]
    fn wrong_alphabet_is_rejected() {
        let bad = "0".repeat(52);
        assert!(matches!(
            DriveKey::decode(&bad),
            Err(Error::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn padding_bits_must_be_zero() {
        let mut encoded = DriveKey::from_bytes([0u8; 32]).encode();
        encoded.pop();
        encoded.push('b');
        assert!(DriveKey::decode(&encoded).is_err());
    }

    #[test]
    fn classify_identifiers() {
        assert_eq!(DriveId::classify(None), DriveId::New);
        assert_eq!(DriveId::classify(Some("")), DriveId::New);
        assert_eq!(
            DriveId::classify(Some("./out")),
            DriveId::Path(PathBuf::from("./out"))
        );
        assert_eq!(
            DriveId::classify(Some("src")),
            DriveId::Path(PathBuf::from("src"))
        );
        let key = DriveKey::generate().encode();
        assert_eq!(DriveId::classify(Some(&key)), DriveId::Key(key.clone()));
        assert!(DriveId::classify(Some(&key)).is_key());
    }
}
