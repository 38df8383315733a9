use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use stowage_types::{ContentDigest, Metadata, Scheme, Uri};

use crate::error::{BackendError, BackendResult};
use crate::traits::Backend;

#[derive(Clone, Debug)]
struct Entry {
    data: Bytes,
    mtime: DateTime<Utc>,
}

/// In-memory, HashMap-based backend for one scheme.
///
/// Intended for tests and embedding. Objects are held behind a `RwLock`,
/// so `write_if_absent` is atomic. Every `write` and `copy` call is counted,
/// which lets callers assert how many physical transfers happened.
pub struct InMemoryBackend {
    scheme: Scheme,
    native_digests: bool,
    objects: RwLock<HashMap<Uri, Entry>>,
    writes: AtomicUsize,
    copies: AtomicUsize,
    reads: AtomicUsize,
}

impl InMemoryBackend {
    /// Create an empty backend serving `scheme`. Digests are not native.
    pub fn new(scheme: Scheme) -> Self {
        Self {
            scheme,
            native_digests: false,
            objects: RwLock::new(HashMap::new()),
            writes: AtomicUsize::new(0),
            copies: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        }
    }

    /// Report MD5 digests from `stat`, like a cloud store exposing ETags.
    pub fn with_native_digests(mut self) -> Self {
        self.native_digests = true;
        self
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the backend holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Contents of an object, without counting a read.
    pub fn contents(&self, uri: &Uri) -> Option<Bytes> {
        let map = self.objects.read().expect("lock poisoned");
        map.get(uri).map(|e| e.data.clone())
    }

    /// Store an object directly, without counting a write.
    pub fn insert(&self, uri: &Uri, data: impl Into<Bytes>) {
        let mut map = self.objects.write().expect("lock poisoned");
        map.insert(
            uri.clone(),
            Entry {
                data: data.into(),
                mtime: Utc::now(),
            },
        );
    }

    /// Return a sorted list of all stored URIs.
    pub fn all_uris(&self) -> Vec<Uri> {
        let map = self.objects.read().expect("lock poisoned");
        let mut uris: Vec<Uri> = map.keys().cloned().collect();
        uris.sort();
        uris
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn copy_count(&self) -> usize {
        self.copies.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.writes.store(0, Ordering::SeqCst);
        self.copies.store(0, Ordering::SeqCst);
        self.reads.store(0, Ordering::SeqCst);
    }

    fn check_scheme(&self, uri: &Uri) -> BackendResult<()> {
        if uri.scheme() != self.scheme {
            return Err(BackendError::Unsupported(format!(
                "in-memory {} backend cannot address {uri}",
                self.scheme
            )));
        }
        Ok(())
    }

    fn entry(&self, uri: &Uri) -> BackendResult<Entry> {
        self.check_scheme(uri)?;
        let map = self.objects.read().expect("lock poisoned");
        map.get(uri)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(uri.clone()))
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn exists(&self, uri: &Uri) -> BackendResult<bool> {
        self.check_scheme(uri)?;
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.contains_key(uri))
    }

    async fn stat(&self, uri: &Uri) -> BackendResult<Metadata> {
        let entry = self.entry(uri)?;
        let digest = self
            .native_digests
            .then(|| ContentDigest::compute(&entry.data));
        Ok(Metadata::new(entry.data.len() as u64, entry.mtime).with_content_hash(digest))
    }

    async fn read(&self, uri: &Uri) -> BackendResult<Bytes> {
        let entry = self.entry(uri)?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(entry.data)
    }

    async fn write(&self, uri: &Uri, data: Bytes) -> BackendResult<()> {
        self.check_scheme(uri)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.insert(uri, data);
        Ok(())
    }

    async fn write_if_absent(&self, uri: &Uri, data: Bytes) -> BackendResult<bool> {
        self.check_scheme(uri)?;
        let mut map = self.objects.write().expect("lock poisoned");
        if map.contains_key(uri) {
            return Ok(false);
        }
        map.insert(
            uri.clone(),
            Entry {
                data,
                mtime: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn copy(&self, source: &Uri, destination: &Uri) -> BackendResult<()> {
        if source.scheme() != self.scheme || destination.scheme() != self.scheme {
            return Err(BackendError::Unsupported(format!(
                "in-memory {} backend cannot copy {source} to {destination}",
                self.scheme
            )));
        }
        let entry = self.entry(source)?;
        self.copies.fetch_add(1, Ordering::SeqCst);
        self.insert(destination, entry.data);
        Ok(())
    }

    async fn remove(&self, uri: &Uri) -> BackendResult<bool> {
        self.check_scheme(uri)?;
        let mut map = self.objects.write().expect("lock poisoned");
        Ok(map.remove(uri).is_some())
    }

    async fn content_hash(&self, uri: &Uri) -> BackendResult<Option<ContentDigest>> {
        if !self.native_digests {
            return Ok(None);
        }
        Ok(self.stat(uri).await?.content_hash)
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("scheme", &self.scheme)
            .field("object_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gs(path: &str) -> Uri {
        Uri::parse(&format!("gs://bucket/{path}")).unwrap()
    }

    #[tokio::test]
    async fn write_and_read() {
        let backend = InMemoryBackend::new(Scheme::Gcs);
        backend.write(&gs("a.txt"), Bytes::from_static(b"abc")).await.unwrap();
        assert_eq!(&backend.read(&gs("a.txt")).await.unwrap()[..], b"abc");
        assert_eq!(backend.write_count(), 1);
        assert_eq!(backend.read_count(), 1);
    }

    #[tokio::test]
    async fn foreign_scheme_is_rejected() {
        let backend = InMemoryBackend::new(Scheme::Gcs);
        let s3 = Uri::parse("s3://bucket/a.txt").unwrap();
        assert!(matches!(backend.exists(&s3).await, Err(BackendError::Unsupported(_))));
        assert!(matches!(
            backend.copy(&s3, &gs("a.txt")).await,
            Err(BackendError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn native_digest_is_reported_when_enabled() {
        let plain = InMemoryBackend::new(Scheme::S3);
        let native = InMemoryBackend::new(Scheme::S3).with_native_digests();
        let uri = Uri::parse("s3://bucket/k").unwrap();
        plain.insert(&uri, Bytes::from_static(b"data"));
        native.insert(&uri, Bytes::from_static(b"data"));

        assert_eq!(plain.content_hash(&uri).await.unwrap(), None);
        assert_eq!(
            native.content_hash(&uri).await.unwrap(),
            Some(ContentDigest::compute(b"data"))
        );
    }

    #[tokio::test]
    async fn copy_counts_and_duplicates() {
        let backend = InMemoryBackend::new(Scheme::Gcs);
        backend.insert(&gs("src"), Bytes::from_static(b"x"));
        backend.copy(&gs("src"), &gs("dst")).await.unwrap();
        assert_eq!(backend.copy_count(), 1);
        assert_eq!(backend.write_count(), 0);
        assert_eq!(backend.contents(&gs("dst")).unwrap(), Bytes::from_static(b"x"));
        assert_eq!(backend.all_uris(), vec![gs("dst"), gs("src")]);
    }

    #[tokio::test]
    async fn write_if_absent_and_remove() {
        let backend = InMemoryBackend::new(Scheme::Local);
        let uri = Uri::parse("/tmp/x.lock").unwrap();
        assert!(backend.write_if_absent(&uri, Bytes::new()).await.unwrap());
        assert!(!backend.write_if_absent(&uri, Bytes::new()).await.unwrap());
        assert!(backend.remove(&uri).await.unwrap());
        assert!(!backend.remove(&uri).await.unwrap());
        assert!(backend.is_empty());
    }
}
