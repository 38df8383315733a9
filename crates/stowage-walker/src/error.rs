use crate::content::ContentType;

#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    /// The bytes do not parse as the declared content type.
    #[error("cannot parse content as {content_type}: {reason}")]
    Unparsable {
        content_type: ContentType,
        reason: String,
    },
}

pub type WalkResult<T> = Result<T, WalkError>;
