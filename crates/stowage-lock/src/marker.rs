use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stowage_types::Uri;
use uuid::Uuid;

use crate::error::LockResult;

/// Suffix appended to a destination URI to name its lock marker.
pub const LOCK_SUFFIX: &str = ".lock";

/// Location of the lock marker guarding `destination`.
pub fn marker_uri(destination: &Uri) -> Uri {
    destination.with_suffix(LOCK_SUFFIX)
}

/// Contents of a lock marker object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMarker {
    /// Unique per acquisition attempt.
    pub owner_id: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl LockMarker {
    /// A fresh marker owned by a new UUIDv7.
    pub fn new(ttl: Duration) -> Self {
        Self {
            owner_id: Uuid::now_v7(),
            acquired_at: Utc::now(),
            ttl_secs: ttl.as_secs(),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.acquired_at + chrono::Duration::seconds(self.ttl_secs.min(i64::MAX as u64) as i64)
    }

    /// A marker is stale once it is older than its own TTL.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        is_older_than(self.acquired_at, self.ttl(), now)
    }

    pub fn to_bytes(&self) -> LockResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn from_bytes(data: &[u8]) -> LockResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// `now - since > age`; a `since` in the future is never old.
pub(crate) fn is_older_than(since: DateTime<Utc>, age: Duration, now: DateTime<Utc>) -> bool {
    match (now - since).to_std() {
        Ok(elapsed) => elapsed > age,
        Err(_) => false,
    }
}
