use std::fmt;
use std::time::Duration;

use serde::Serialize;
use stowage_backend::BackendError;
use stowage_cache::CacheError;
use stowage_lock::LockError;
use stowage_types::{Scheme, TypeError, Uri};
use stowage_walker::WalkError;

/// Errors from a localization call.
#[derive(Debug, thiserror::Error)]
pub enum LocalizeError {
    /// The source, or a child it references, does not exist.
    #[error("not found: {0}")]
    NotFound(Uri),

    /// A live lock on the destination outlasted the timeout. Nothing was
    /// written to that destination.
    #[error("timed out after {waited:?} waiting for lock on {destination}")]
    LockTimeout { destination: Uri, waited: Duration },

    /// No backend copy, direct transfer, or staging path can move the object.
    #[error("cannot localize {from} onto {to}: {reason}")]
    CrossSchemeUnsupported { from: Uri, to: Uri, reason: String },

    /// A structured document does not parse as its declared format.
    #[error("unparsable content in {uri}: {source}")]
    UnparsableContent {
        uri: Uri,
        #[source]
        source: WalkError,
    },

    /// Transport, authentication, or filesystem failure in a backend.
    #[error("backend I/O error: {0}")]
    BackendIo(#[source] BackendError),

    #[error("invalid URI: {0}")]
    InvalidUri(#[from] TypeError),

    #[error("no backend configured for scheme {0}")]
    BackendNotConfigured(Scheme),
}

/// Flat classification of [`LocalizeError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    LockTimeout,
    CrossSchemeUnsupported,
    UnparsableContent,
    BackendIo,
    InvalidUri,
    BackendNotConfigured,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::LockTimeout => "lock_timeout",
            Self::CrossSchemeUnsupported => "cross_scheme_unsupported",
            Self::UnparsableContent => "unparsable_content",
            Self::BackendIo => "backend_io",
            Self::InvalidUri => "invalid_uri",
            Self::BackendNotConfigured => "backend_not_configured",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LocalizeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::LockTimeout { .. } => ErrorKind::LockTimeout,
            Self::CrossSchemeUnsupported { .. } => ErrorKind::CrossSchemeUnsupported,
            Self::UnparsableContent { .. } => ErrorKind::UnparsableContent,
            Self::BackendIo(_) => ErrorKind::BackendIo,
            Self::InvalidUri(_) => ErrorKind::InvalidUri,
            Self::BackendNotConfigured(_) => ErrorKind::BackendNotConfigured,
        }
    }
}

impl From<BackendError> for LocalizeError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound(uri) => Self::NotFound(uri),
            BackendError::NoBackend(scheme) => Self::BackendNotConfigured(scheme),
            BackendError::Type(e) => Self::InvalidUri(e),
            other => Self::BackendIo(other),
        }
    }
}

impl From<LockError> for LocalizeError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout {
                destination,
                waited,
            } => Self::LockTimeout {
                destination,
                waited,
            },
            LockError::Backend(e) => e.into(),
            LockError::Marker(e) => Self::BackendIo(BackendError::Io(e.into())),
        }
    }
}

impl From<CacheError> for LocalizeError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Backend(e) => e.into(),
        }
    }
}

pub type LocalizeResult<T> = Result<T, LocalizeError>;

/// Errors loading a [`StowageConfig`](crate::StowageConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
}
