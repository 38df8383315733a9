use std::time::Duration;

use stowage_backend::BackendError;
use stowage_types::Uri;

/// Errors from lock acquisition and release.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// A live marker was still present when the timeout elapsed.
    #[error("timed out after {waited:?} waiting for lock on {destination}")]
    Timeout { destination: Uri, waited: Duration },

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The marker could not be encoded.
    #[error("lock marker encoding: {0}")]
    Marker(#[from] serde_json::Error),
}

pub type LockResult<T> = Result<T, LockError>;
