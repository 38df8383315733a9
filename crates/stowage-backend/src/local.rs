use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use stowage_types::{ContentDigest, DigestHasher, Metadata, Scheme, Uri};
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::error::{BackendError, BackendResult};
use crate::traits::Backend;

/// Read buffer used when hashing files in chunks.
const HASH_CHUNK_SIZE: usize = 256 * 1024;

/// Local filesystem backend.
///
/// Writes go to a temporary file in the destination directory and are
/// renamed into place, so a concurrent reader sees either the old or the new
/// file, never a partial one.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }

    fn path_of(uri: &Uri) -> BackendResult<PathBuf> {
        uri.local_path().ok_or_else(|| {
            BackendError::Unsupported(format!("local backend cannot address {uri}"))
        })
    }

    async fn ensure_parent(path: &Path) -> BackendResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn not_found(uri: &Uri, err: io::Error) -> BackendError {
        if err.kind() == io::ErrorKind::NotFound {
            BackendError::NotFound(uri.clone())
        } else {
            BackendError::Io(err)
        }
    }
}

/// Write `data` to a sibling temp file and atomically rename it over `path`.
fn persist_atomically(path: PathBuf, data: Bytes) -> io::Result<()> {
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));
    let mut temp = NamedTempFile::new_in(&dir)?;
    temp.write_all(&data)?;
    temp.as_file().sync_all()?;
    temp.persist(&path).map_err(|e| e.error)?;
    Ok(())
}

/// Copy `from` into a sibling temp file of `to` and rename it into place.
fn copy_atomically(from: PathBuf, to: PathBuf) -> io::Result<()> {
    let dir = to
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));
    let temp = NamedTempFile::new_in(&dir)?;
    std::fs::copy(&from, temp.path())?;
    temp.persist(&to).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl Backend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn exists(&self, uri: &Uri) -> BackendResult<bool> {
        let path = Self::path_of(uri)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn stat(&self, uri: &Uri) -> BackendResult<Metadata> {
        let path = Self::path_of(uri)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| Self::not_found(uri, e))?;
        let mtime: DateTime<Utc> = meta.modified()?.into();
        Ok(Metadata::new(meta.len(), mtime))
    }

    async fn read(&self, uri: &Uri) -> BackendResult<Bytes> {
        let path = Self::path_of(uri)?;
        let data = fs::read(&path).await.map_err(|e| Self::not_found(uri, e))?;
        Ok(Bytes::from(data))
    }

    async fn write(&self, uri: &Uri, data: Bytes) -> BackendResult<()> {
        let path = Self::path_of(uri)?;
        Self::ensure_parent(&path).await?;
        let len = data.len();
        tokio::task::spawn_blocking(move || persist_atomically(path, data))
            .await
            .map_err(io::Error::other)??;
        debug!(%uri, bytes = len, "local write");
        Ok(())
    }

    async fn write_if_absent(&self, uri: &Uri, data: Bytes) -> BackendResult<bool> {
        let path = Self::path_of(uri)?;
        Self::ensure_parent(&path).await?;
        let opened = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;
        let mut file = match opened {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        file.write_all(&data).await?;
        file.sync_all().await?;
        Ok(true)
    }

    async fn copy(&self, source: &Uri, destination: &Uri) -> BackendResult<()> {
        if source.scheme() != Scheme::Local || destination.scheme() != Scheme::Local {
            return Err(BackendError::Unsupported(format!(
                "local backend cannot copy {source} to {destination}"
            )));
        }
        let from = Self::path_of(source)?;
        let to = Self::path_of(destination)?;
        if !fs::try_exists(&from).await? {
            return Err(BackendError::NotFound(source.clone()));
        }
        Self::ensure_parent(&to).await?;
        tokio::task::spawn_blocking(move || copy_atomically(from, to))
            .await
            .map_err(io::Error::other)??;
        debug!(%source, %destination, "local copy");
        Ok(())
    }

    async fn remove(&self, uri: &Uri) -> BackendResult<bool> {
        let path = Self::path_of(uri)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn content_hash(&self, _uri: &Uri) -> BackendResult<Option<ContentDigest>> {
        Ok(None)
    }

    async fn hash_contents(&self, uri: &Uri) -> BackendResult<ContentDigest> {
        let path = Self::path_of(uri)?;
        let mut file = fs::File::open(&path)
            .await
            .map_err(|e| Self::not_found(uri, e))?;
        let mut hasher = DigestHasher::new();
        let mut buf = vec![0u8; HASH_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri_in(dir: &Path, rel: &str) -> Uri {
        Uri::from_local_path(dir.join(rel)).unwrap()
    }

    #[tokio::test]
    async fn write_read_stat() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new();
        let uri = uri_in(dir.path(), "nested/deeper/a.txt");

        assert!(!backend.exists(&uri).await.unwrap());
        backend.write(&uri, Bytes::from_static(b"hello")).await.unwrap();
        assert!(backend.exists(&uri).await.unwrap());
        assert_eq!(&backend.read(&uri).await.unwrap()[..], b"hello");

        let meta = backend.stat(&uri).await.unwrap();
        assert_eq!(meta.size, 5);
        assert!(meta.content_hash.is_none());
    }

    #[tokio::test]
    async fn stat_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new();
        let uri = uri_in(dir.path(), "missing.txt");
        assert!(matches!(backend.stat(&uri).await, Err(BackendError::NotFound(_))));
        assert!(matches!(backend.read(&uri).await, Err(BackendError::NotFound(_))));
    }

    #[tokio::test]
    async fn write_if_absent_only_creates_once() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new();
        let uri = uri_in(dir.path(), "marker.lock");

        assert!(backend.write_if_absent(&uri, Bytes::from_static(b"a")).await.unwrap());
        assert!(!backend.write_if_absent(&uri, Bytes::from_static(b"b")).await.unwrap());
        assert_eq!(&backend.read(&uri).await.unwrap()[..], b"a");
    }

    #[tokio::test]
    async fn copy_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new();
        let src = uri_in(dir.path(), "src.txt");
        let dst = uri_in(dir.path(), "out/dst.txt");
        backend.write(&src, Bytes::from_static(b"payload")).await.unwrap();

        backend.copy(&src, &dst).await.unwrap();
        assert_eq!(&backend.read(&dst).await.unwrap()[..], b"payload");

        assert!(backend.remove(&dst).await.unwrap());
        assert!(!backend.remove(&dst).await.unwrap());
    }

    #[tokio::test]
    async fn copy_from_foreign_scheme_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new();
        let src = Uri::parse("gs://bucket/a.txt").unwrap();
        let dst = uri_in(dir.path(), "a.txt");
        assert!(matches!(
            backend.copy(&src, &dst).await,
            Err(BackendError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn streamed_hash_matches_one_shot() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new();
        let uri = uri_in(dir.path(), "big.bin");
        let data: Vec<u8> = (0..(HASH_CHUNK_SIZE * 2 + 17)).map(|i| (i % 251) as u8).collect();
        backend.write(&uri, Bytes::from(data.clone())).await.unwrap();

        let digest = backend.hash_contents(&uri).await.unwrap();
        assert_eq!(digest, ContentDigest::compute(&data));
    }
}
