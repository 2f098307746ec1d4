use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Content address for any chunk or object stored in a repository.
///
/// A `Checksum` is the BLAKE3 hash of a payload's content. Identical content
/// always produces the same `Checksum`, which is what makes payloads
/// deduplicatable: a second write of the same bytes is a no-op.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Checksum([u8; 32]);

impl Checksum {
    /// Compute the checksum of a byte slice.
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Wrap a pre-computed 32-byte digest.
    pub const fn from_raw(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    /// The raw 32-byte digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters), for log lines.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(TypeError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&bytes);
        Ok(Self(digest))
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.short_hex())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for Checksum {
    fn from(digest: [u8; 32]) -> Self {
        Self(digest)
    }
}

impl From<Checksum> for [u8; 32] {
    fn from(checksum: Checksum) -> Self {
        checksum.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn of_is_deterministic() {
        let data = b"hello world";
        let c1 = Checksum::of(data);
        let c2 = Checksum::of(data);
        assert_eq!(c1, c2);
    }

    #[test]
    fn different_data_produces_different_checksums() {
        let c1 = Checksum::of(b"hello");
        let c2 = Checksum::of(b"world");
        assert_ne!(c1, c2);
    }

    #[test]
    fn hex_roundtrip() {
        let c = Checksum::of(b"test");
        let parsed = Checksum::from_hex(&c.to_hex()).unwrap();
        assert_eq!(c, parsed);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        let err = Checksum::from_hex("abcd").unwrap_err();
        assert!(matches!(err, TypeError::InvalidLength { actual: 2, .. }));
    }

    #[test]
    fn from_hex_rejects_garbage() {
        let err = Checksum::from_hex("zz").unwrap_err();
        assert!(matches!(err, TypeError::InvalidHex(_)));
    }

    #[test]
    fn display_is_full_hex() {
        let c = Checksum::of(b"test");
        let display = format!("{c}");
        assert_eq!(display.len(), 64);
        assert_eq!(display, c.to_hex());
    }

    #[test]
    fn short_hex_is_8_chars() {
        let c = Checksum::of(b"test");
        assert_eq!(c.short_hex().len(), 8);
    }

    #[test]
    fn serde_roundtrip() {
        let c = Checksum::of(b"serde test");
        let json = serde_json::to_string(&c).unwrap();
        let parsed: Checksum = serde_json::from_str(&json).unwrap();
        assert_eq!(c, parsed);
    }

    #[test]
    fn ordering_is_consistent() {
        let c1 = Checksum::from_raw([0; 32]);
        let c2 = Checksum::from_raw([1; 32]);
        assert!(c1 < c2);
    }
}
