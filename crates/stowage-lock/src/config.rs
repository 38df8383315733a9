use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing parameters for [`LockManager`](crate::LockManager).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LockConfig {
    /// Age after which a marker written with this config is stale.
    pub ttl_secs: u64,
    /// How long `acquire` waits for a live marker to go away.
    pub timeout_secs: u64,
    /// First backoff delay between acquisition attempts.
    pub poll_interval_ms: u64,
    /// Upper bound for the doubling backoff delay.
    pub max_poll_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 1800,
            timeout_secs: 900,
            poll_interval_ms: 500,
            max_poll_interval_ms: 10_000,
        }
    }
}

impl LockConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms.max(self.poll_interval_ms))
    }
}
