use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use stowage_types::{ContentDigest, Metadata, Uri};

use crate::error::{BackendError, BackendResult};

/// Storage operations for one URI scheme.
///
/// All implementations must satisfy these invariants:
/// - `write` replaces the object as a whole; readers never observe a torn
///   object at the destination.
/// - `stat` fails with [`BackendError::NotFound`] for an absent object.
/// - `remove` of an absent object is not an error.
/// - Read-only backends fail every mutation with [`BackendError::ReadOnly`].
#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Check whether an object exists.
    async fn exists(&self, uri: &Uri) -> BackendResult<bool>;

    /// Size, modification time and native digest of an object.
    async fn stat(&self, uri: &Uri) -> BackendResult<Metadata>;

    /// Read the full contents of an object.
    async fn read(&self, uri: &Uri) -> BackendResult<Bytes>;

    /// Create or replace an object.
    async fn write(&self, uri: &Uri, data: Bytes) -> BackendResult<()>;

    /// Create an object only if nothing exists at `uri` yet.
    ///
    /// Returns `false` without writing if the object already exists. The
    /// default implementation is a non-atomic check-then-write; backends
    /// with a native conditional create override it.
    async fn write_if_absent(&self, uri: &Uri, data: Bytes) -> BackendResult<bool> {
        if self.exists(uri).await? {
            return Ok(false);
        }
        self.write(uri, data).await?;
        Ok(true)
    }

    /// Copy `source` to `destination` without routing bytes through the caller.
    ///
    /// Returns [`BackendError::Unsupported`] when this backend cannot bridge
    /// the two URIs directly.
    async fn copy(&self, source: &Uri, destination: &Uri) -> BackendResult<()> {
        Err(BackendError::Unsupported(format!(
            "{} cannot copy {source} to {destination}",
            self.name()
        )))
    }

    /// Remove an object. Returns `true` if the backend knows it existed.
    async fn remove(&self, uri: &Uri) -> BackendResult<bool>;

    /// Backend-native digest, if one is available without reading the object.
    async fn content_hash(&self, uri: &Uri) -> BackendResult<Option<ContentDigest>> {
        Ok(self.stat(uri).await?.content_hash)
    }

    /// Digest computed from the object's bytes.
    ///
    /// The default reads the whole object; backends that can stream override it.
    async fn hash_contents(&self, uri: &Uri) -> BackendResult<ContentDigest> {
        let data = self.read(uri).await?;
        Ok(ContentDigest::compute(&data))
    }

    /// A time-limited public URL for the object.
    async fn presign(&self, uri: &Uri, expires_in: Duration) -> BackendResult<String> {
        let _ = expires_in;
        Err(BackendError::Unsupported(format!(
            "{} cannot presign {uri}",
            self.name()
        )))
    }
}
