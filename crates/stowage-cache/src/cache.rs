use bytes::Bytes;
use stowage_backend::{Backend, BackendError, BackendRegistry};
use stowage_types::{ContentDigest, Metadata, Uri};
use tracing::{debug, warn};

use crate::error::CacheResult;

/// Suffix appended to an object URI to name its digest record.
pub const RECORD_SUFFIX: &str = ".md5";

/// Location of the digest record describing `uri`.
pub fn record_uri(uri: &Uri) -> Uri {
    uri.with_suffix(RECORD_SUFFIX)
}

/// Outcome of comparing a source against a destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheDecision {
    /// `true` when the destination already holds the source's content.
    pub skip: bool,
    pub source_digest: ContentDigest,
    /// `None` when the destination does not exist.
    pub destination_digest: Option<ContentDigest>,
}

/// Digest-based skip decisions over a backend registry.
#[derive(Clone, Debug)]
pub struct TransferCache {
    registry: BackendRegistry,
}

impl TransferCache {
    pub fn new(registry: BackendRegistry) -> Self {
        Self { registry }
    }

    /// Whether copying `source` to `destination` can be skipped.
    pub async fn should_skip(&self, source: &Uri, destination: &Uri) -> CacheResult<bool> {
        Ok(self.check(source, destination).await?.skip)
    }

    /// Compare digests and keep both for the caller.
    ///
    /// The source digest is always computed, so it can be recorded after a
    /// transfer without hashing twice.
    pub async fn check(&self, source: &Uri, destination: &Uri) -> CacheResult<CacheDecision> {
        let source_digest = self
            .digest(source)
            .await?
            .ok_or_else(|| BackendError::NotFound(source.clone()))?;
        let destination_digest = self.digest(destination).await?;
        let skip = destination_digest == Some(source_digest);
        debug!(%source, %destination, skip, "transfer cache check");
        Ok(CacheDecision {
            skip,
            source_digest,
            destination_digest,
        })
    }

    /// Whether `destination` already holds content with digest `expected`.
    ///
    /// Used for generated content, such as a rewritten document, that has no
    /// source object of its own.
    pub async fn matches(&self, expected: ContentDigest, destination: &Uri) -> CacheResult<bool> {
        let actual = self.digest(destination).await?;
        let skip = actual == Some(expected);
        debug!(%destination, skip, "transfer cache check (generated content)");
        Ok(skip)
    }

    /// Persist the digest just written to `destination`.
    pub async fn record(&self, destination: &Uri, digest: ContentDigest) -> CacheResult<()> {
        let record = record_uri(destination);
        let backend = self.registry.resolve(&record)?;
        backend
            .write(&record, Bytes::from(digest.to_hex()))
            .await?;
        debug!(%destination, %digest, "recorded digest");
        Ok(())
    }

    /// Digest of an object, or `None` if it does not exist.
    ///
    /// Sources in order: the backend's native digest, a digest record that is
    /// not older than the object, then hashing the full contents.
    pub async fn digest(&self, uri: &Uri) -> CacheResult<Option<ContentDigest>> {
        let backend = self.registry.resolve(uri)?;
        let meta = match backend.stat(uri).await {
            Ok(meta) => meta,
            Err(BackendError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if let Some(native) = meta.content_hash {
            return Ok(Some(native));
        }
        if let Some(recorded) = self.recorded(uri, &meta).await {
            return Ok(Some(recorded));
        }
        debug!(%uri, size = meta.size, "hashing full contents");
        Ok(Some(backend.hash_contents(uri).await?))
    }

    /// Digest of what `uri` holds now, never taken from a digest record.
    ///
    /// Used right after a write, when the record still describes the old
    /// contents.
    pub async fn observed(&self, uri: &Uri) -> CacheResult<ContentDigest> {
        let backend = self.registry.resolve(uri)?;
        if let Some(native) = backend.content_hash(uri).await? {
            return Ok(native);
        }
        Ok(backend.hash_contents(uri).await?)
    }

    /// A fresh, well-formed digest record for `uri`.
    ///
    /// Any failure to read the record means there is none to trust.
    async fn recorded(&self, uri: &Uri, meta: &Metadata) -> Option<ContentDigest> {
        let record = record_uri(uri);
        let backend = self.registry.resolve(&record).ok()?;
        let record_meta = match backend.stat(&record).await {
            Ok(m) => m,
            Err(BackendError::NotFound(_)) => return None,
            Err(e) => {
                debug!(%record, error = %e, "digest record unavailable");
                return None;
            }
        };
        if record_meta.mtime < meta.mtime {
            debug!(%record, "digest record older than object, ignoring");
            return None;
        }
        read_record(backend.as_ref(), &record).await
    }
}

async fn read_record(backend: &dyn Backend, record: &Uri) -> Option<ContentDigest> {
    let data = match backend.read(record).await {
        Ok(data) => data,
        Err(e) => {
            debug!(%record, error = %e, "digest record unreadable");
            return None;
        }
    };
    let text = String::from_utf8_lossy(&data);
    // md5sum-style records carry the file name after the digest.
    let hex = text.split_whitespace().next().unwrap_or_default();
    match ContentDigest::from_hex(hex) {
        Ok(digest) => Some(digest),
        Err(e) => {
            warn!(%record, error = %e, "malformed digest record, ignoring");
            None
        }
    }
}
