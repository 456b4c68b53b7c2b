//! Block digests.
//!
//! Every block is digested with BLAKE3. Digests are rendered as lowercase
//! hex, two characters per byte, in byte order, with no separators.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Digest width in bytes.
pub const DIGEST_LEN: usize = 32;

/// A BLAKE3 digest over one block's bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum HexError {
    #[error("invalid hex digest: {0}")]
    Invalid(#[from] hex::FromHexError),
    #[error("expected a 32-byte digest, got {0} bytes")]
    Length(usize),
}

impl Digest {
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex, `2 * DIGEST_LEN` characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, HexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; DIGEST_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HexError::Length(bytes.len()))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

// Digests travel as hex strings so result payloads stay readable.
impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Hash a byte slice in one shot.
pub fn hash(data: &[u8]) -> Digest {
    Digest(*blake3::hash(data).as_bytes())
}

/// Incremental hasher for block contents that are streamed through a
/// fixed-size buffer.
///
/// # Example
/// ```
/// use shardsum_core::digest::{hash, StreamHasher};
/// let mut h = StreamHasher::new();
/// h.update(b"hello ");
/// h.update(b"world");
/// assert_eq!(h.finalize(), hash(b"hello world"));
/// ```
pub struct StreamHasher {
    inner: blake3::Hasher,
    bytes: u64,
}

impl StreamHasher {
    pub fn new() -> Self {
        Self {
            inner: blake3::Hasher::new(),
            bytes: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.bytes += data.len() as u64;
    }

    /// Number of bytes fed so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    pub fn finalize(self) -> Digest {
        Digest(*self.inner.finalize().as_bytes())
    }
}

impl Default for StreamHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_known_vector() {
        // BLAKE3 official test vector for the empty input
        assert_eq!(
            hash(b"").to_hex(),
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash(b"shardsum"), hash(b"shardsum"));
        assert_ne!(hash(b"shardsum"), hash(b"Shardsum"));
    }

    #[test]
    fn stream_hasher_matches_oneshot_across_splits() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        for split in [1usize, 7, 4096, 9_999] {
            let mut h = StreamHasher::new();
            for piece in data.chunks(split) {
                h.update(piece);
            }
            assert_eq!(h.bytes_hashed(), data.len() as u64);
            assert_eq!(h.finalize(), hash(&data));
        }
    }

    #[test]
    fn hex_is_lowercase_fixed_width() {
        let d = Digest::from_bytes([0xAB; DIGEST_LEN]);
        let s = d.to_hex();
        assert_eq!(s.len(), DIGEST_LEN * 2);
        assert_eq!(s, s.to_lowercase());
        assert!(s.starts_with("abab"));

        let zero = Digest::from_bytes([0x00; DIGEST_LEN]).to_hex();
        assert_eq!(zero, "0".repeat(DIGEST_LEN * 2));
    }

    #[test]
    fn hex_round_trip() {
        let d = hash(b"round trip");
        assert_eq!(Digest::from_hex(&d.to_hex()).unwrap(), d);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert_eq!(Digest::from_hex("abcd"), Err(HexError::Length(2)));
        assert!(matches!(Digest::from_hex("zz"), Err(HexError::Invalid(_))));
    }

    #[test]
    fn serializes_as_hex_string() {
        let d = hash(b"json");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"{}\"", d.to_hex()));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
