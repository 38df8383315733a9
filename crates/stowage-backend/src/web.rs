use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, ETAG, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use stowage_types::{ContentDigest, Metadata, Scheme, Uri};
use tracing::debug;

use crate::config::HttpConfig;
use crate::error::{BackendError, BackendResult};
use crate::traits::Backend;

const CONTENT_MD5: &str = "content-md5";

/// Read-only backend for `http://` and `https://` URLs.
///
/// Objects are probed with `HEAD` and fetched with `GET`. Every mutation
/// fails with [`BackendError::ReadOnly`].
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
}

impl HttpBackend {
    pub fn new(config: &HttpConfig) -> BackendResult<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::Config(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    fn check_scheme(uri: &Uri) -> BackendResult<()> {
        match uri.scheme() {
            Scheme::Http | Scheme::Https => Ok(()),
            _ => Err(BackendError::Unsupported(format!(
                "http backend cannot address {uri}"
            ))),
        }
    }

    async fn head(&self, uri: &Uri) -> BackendResult<Option<HeaderMap>> {
        Self::check_scheme(uri)?;
        let resp = self
            .client
            .head(uri.to_string())
            .send()
            .await
            .map_err(|e| BackendError::remote(uri, e))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| BackendError::remote(uri, e))?;
        Ok(Some(resp.headers().clone()))
    }
}

/// Build object metadata from response headers.
///
/// A missing `Last-Modified` yields the epoch, so such objects never look
/// newer than a recorded digest.
fn metadata_from_headers(headers: &HeaderMap) -> Metadata {
    let size = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let mtime = headers
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default();
    Metadata::new(size, mtime).with_content_hash(digest_from_headers(headers))
}

/// `Content-MD5` (base64) first, then an MD5-shaped `ETag`.
fn digest_from_headers(headers: &HeaderMap) -> Option<ContentDigest> {
    let from_md5 = headers
        .get(CONTENT_MD5)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| BASE64.decode(v.trim()).ok())
        .and_then(|raw| ContentDigest::from_slice(&raw).ok());
    from_md5.or_else(|| {
        headers
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .and_then(ContentDigest::from_etag)
    })
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn exists(&self, uri: &Uri) -> BackendResult<bool> {
        Ok(self.head(uri).await?.is_some())
    }

    async fn stat(&self, uri: &Uri) -> BackendResult<Metadata> {
        let headers = self
            .head(uri)
            .await?
            .ok_or_else(|| BackendError::NotFound(uri.clone()))?;
        Ok(metadata_from_headers(&headers))
    }

    async fn read(&self, uri: &Uri) -> BackendResult<Bytes> {
        Self::check_scheme(uri)?;
        let resp = self
            .client
            .get(uri.to_string())
            .send()
            .await
            .map_err(|e| BackendError::remote(uri, e))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound(uri.clone()));
        }
        let data = resp
            .error_for_status()
            .map_err(|e| BackendError::remote(uri, e))?
            .bytes()
            .await
            .map_err(|e| BackendError::remote(uri, e))?;
        debug!(%uri, bytes = data.len(), "http read");
        Ok(data)
    }

    async fn write(&self, uri: &Uri, _data: Bytes) -> BackendResult<()> {
        Err(BackendError::ReadOnly(uri.clone()))
    }

    async fn write_if_absent(&self, uri: &Uri, _data: Bytes) -> BackendResult<bool> {
        Err(BackendError::ReadOnly(uri.clone()))
    }

    async fn copy(&self, _source: &Uri, destination: &Uri) -> BackendResult<()> {
        Err(BackendError::ReadOnly(destination.clone()))
    }

    async fn remove(&self, uri: &Uri) -> BackendResult<bool> {
        Err(BackendError::ReadOnly(uri.clone()))
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    fn backend() -> HttpBackend {
        HttpBackend::new(&HttpConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn mutations_are_read_only() {
        let backend = backend();
        let uri = Uri::parse("https://example.com/a.txt").unwrap();
        assert!(matches!(
            backend.write(&uri, Bytes::new()).await,
            Err(BackendError::ReadOnly(_))
        ));
        assert!(matches!(
            backend.write_if_absent(&uri, Bytes::new()).await,
            Err(BackendError::ReadOnly(_))
        ));
        assert!(matches!(backend.remove(&uri).await, Err(BackendError::ReadOnly(_))));
    }

    #[tokio::test]
    async fn foreign_scheme_is_rejected_before_any_request() {
        let backend = backend();
        let uri = Uri::parse("gs://bucket/a.txt").unwrap();
        assert!(matches!(backend.read(&uri).await, Err(BackendError::Unsupported(_))));
    }

    #[test]
    fn metadata_prefers_content_md5() {
        let digest = ContentDigest::compute(b"hello");
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("5"));
        headers.insert(
            LAST_MODIFIED,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        headers.insert(
            CONTENT_MD5,
            HeaderValue::from_str(&BASE64.encode(digest.as_bytes())).unwrap(),
        );
        headers.insert(ETAG, HeaderValue::from_static("\"deadbeef\""));

        let meta = metadata_from_headers(&headers);
        assert_eq!(meta.size, 5);
        assert_eq!(meta.mtime.to_rfc3339(), "2015-10-21T07:28:00+00:00");
        assert_eq!(meta.content_hash, Some(digest));
    }

    #[test]
    fn metadata_falls_back_to_md5_etag() {
        let digest = ContentDigest::compute(b"x");
        let mut headers = HeaderMap::new();
        headers.insert(
            ETAG,
            HeaderValue::from_str(&format!("\"{}\"", digest.to_hex())).unwrap(),
        );
        let meta = metadata_from_headers(&headers);
        assert_eq!(meta.size, 0);
        assert_eq!(meta.mtime, DateTime::<Utc>::default());
        assert_eq!(meta.content_hash, Some(digest));
    }

    #[test]
    fn multipart_etag_is_not_a_digest() {
        let mut headers = HeaderMap::new();
        headers.insert(
            ETAG,
            HeaderValue::from_static("\"d41d8cd98f00b204e9800998ecf8427e-3\""),
        );
        assert!(digest_from_headers(&headers).is_none());
    }
}
