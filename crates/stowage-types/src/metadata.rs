use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::ContentDigest;

/// What a backend reports about one stored object.
///
/// Metadata is computed on demand by `stat` and is never cached beyond the
/// operation that asked for it. `mtime` carries whatever precision the
/// backend offers, so it is informational only and never used to decide
/// whether two objects are identical.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time.
    pub mtime: DateTime<Utc>,
    /// Backend-native digest, if the backend exposes one cheaply.
    pub content_hash: Option<ContentDigest>,
}

impl Metadata {
    pub fn new(size: u64, mtime: DateTime<Utc>) -> Self {
        Self {
            size,
            mtime,
            content_hash: None,
        }
    }

    pub fn with_content_hash(mut self, digest: Option<ContentDigest>) -> Self {
        self.content_hash = digest;
        self
    }
}
