use stowage_backend::BackendError;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

pub type CacheResult<T> = Result<T, CacheError>;
