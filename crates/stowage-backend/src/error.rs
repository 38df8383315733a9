use stowage_types::{Scheme, TypeError, Uri};

/// Errors from backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The requested object does not exist.
    #[error("object not found: {0}")]
    NotFound(Uri),

    /// The backend cannot perform this operation (or this scheme pair).
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Attempted to modify a read-only location.
    #[error("read-only location: {0}")]
    ReadOnly(Uri),

    /// No backend is registered for the scheme.
    #[error("no backend configured for scheme {0}")]
    NoBackend(Scheme),

    /// Failure reported by a remote service (transport, auth, throttling).
    #[error("remote error on {uri}: {message}")]
    Remote { uri: String, message: String },

    /// An external transfer tool exited unsuccessfully.
    #[error("transfer tool {program} failed: {message}")]
    Tool { program: String, message: String },

    /// Backend construction failed.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid URI: {0}")]
    Type(#[from] TypeError),

    /// I/O error from the local filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    pub(crate) fn remote(uri: &Uri, message: impl std::fmt::Display) -> Self {
        Self::Remote {
            uri: uri.to_string(),
            message: message.to_string(),
        }
    }
}

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
