use std::fmt;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// MD5 content digest of a stored object.
///
/// MD5 is used because it is the digest cloud object stores and HTTP servers
/// report natively (single-part ETags, `Content-MD5`), which lets the transfer
/// cache compare a remote object without downloading it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest([u8; 16]);

impl ContentDigest {
    /// Hash raw bytes.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = DigestHasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Create a digest from a pre-computed hash.
    pub fn from_raw(raw: [u8; 16]) -> Self {
        Self(raw)
    }

    /// The raw 16-byte hash.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s.trim()).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Build from a byte slice that must be exactly 16 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        if bytes.len() != 16 {
            return Err(TypeError::InvalidLength {
                expected: 16,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 16];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Interpret an ETag as a digest.
    ///
    /// Only a bare 32-character hex ETag is an MD5; multipart and composite
    /// ETags (`"...-3"`, base64 generations) return `None`.
    pub fn from_etag(etag: &str) -> Option<Self> {
        let tag = etag.trim().trim_start_matches("W/").trim_matches('"');
        if tag.len() != 32 || !tag.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Self::from_hex(tag).ok()
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<ContentDigest> for String {
    fn from(digest: ContentDigest) -> Self {
        digest.to_hex()
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

/// Incremental hasher for content that arrives in chunks.
pub struct DigestHasher {
    inner: Md5,
}

impl DigestHasher {
    pub fn new() -> Self {
        Self { inner: Md5::new() }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    pub fn finalize(self) -> ContentDigest {
        let out = self.inner.finalize();
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&out);
        ContentDigest(arr)
    }
}

impl Default for DigestHasher {
    fn default() -> Self {
        Self::new()
    }
}
