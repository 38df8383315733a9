use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("unknown URI scheme: {0}")]
    UnknownScheme(String),

    #[error("invalid URI {uri}: {reason}")]
    InvalidUri { uri: String, reason: String },
}
