use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::{AmazonS3Builder, AmazonS3ConfigKey, S3ConditionalPut};
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::memory::InMemory;
use object_store::path::Path as StorePath;
use object_store::signer::Signer;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, PutResult};
use stowage_types::{ContentDigest, Metadata, Scheme, Uri};
use tracing::{debug, warn};

use crate::config::{GcsConfig, S3Config};
use crate::error::{BackendError, BackendResult};
use crate::tool::TransferTool;
use crate::traits::Backend;

/// Client pair for one bucket.
#[derive(Clone)]
pub struct BucketHandle {
    pub store: Arc<dyn ObjectStore>,
    /// Present when the client holds credentials that can sign URLs.
    pub signer: Option<Arc<dyn Signer>>,
}

/// Builds a client for a bucket on first use.
pub trait BucketConnector: Send + Sync + std::fmt::Debug {
    fn connect(&self, bucket: &str) -> BackendResult<BucketHandle>;
}

/// Google Cloud Storage buckets, credentials from the environment or a
/// service account key file.
#[derive(Clone, Debug)]
pub struct GcsConnector {
    config: GcsConfig,
}

impl GcsConnector {
    pub fn new(config: GcsConfig) -> Self {
        Self { config }
    }
}

impl BucketConnector for GcsConnector {
    fn connect(&self, bucket: &str) -> BackendResult<BucketHandle> {
        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);
        if let Some(key) = &self.config.service_account_key {
            builder = builder.with_service_account_path(key.to_string_lossy());
        }
        let store = Arc::new(
            builder
                .build()
                .map_err(|e| BackendError::Config(format!("gs://{bucket}: {e}")))?,
        );
        Ok(BucketHandle {
            store: store.clone(),
            signer: Some(store),
        })
    }
}

/// Amazon S3 (or S3-compatible) buckets.
#[derive(Clone, Debug)]
pub struct S3Connector {
    config: S3Config,
}

impl S3Connector {
    pub fn new(config: S3Config) -> Self {
        Self { config }
    }

    /// Client builder for one bucket.
    ///
    /// Conditional puts default to ETag matching so `PutMode::Create` is an
    /// atomic create; an explicit `AWS_CONDITIONAL_PUT` setting is kept.
    fn builder(&self, bucket: &str) -> AmazonS3Builder {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_allow_http(self.config.allow_http);
        if let Some(region) = &self.config.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &self.config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if builder
            .get_config_value(&AmazonS3ConfigKey::ConditionalPut)
            .is_none()
        {
            builder = builder.with_conditional_put(S3ConditionalPut::ETagMatch);
        }
        builder
    }
}

impl BucketConnector for S3Connector {
    fn connect(&self, bucket: &str) -> BackendResult<BucketHandle> {
        let store = Arc::new(
            self.builder(bucket)
                .build()
                .map_err(|e| BackendError::Config(format!("s3://{bucket}: {e}")))?,
        );
        Ok(BucketHandle {
            store: store.clone(),
            signer: Some(store),
        })
    }
}

/// A fresh `object_store::memory::InMemory` per bucket, for tests and embedding.
#[derive(Clone, Copy, Debug, Default)]
pub struct InMemoryConnector;

impl BucketConnector for InMemoryConnector {
    fn connect(&self, _bucket: &str) -> BackendResult<BucketHandle> {
        Ok(BucketHandle {
            store: Arc::new(InMemory::new()),
            signer: None,
        })
    }
}

/// Backend for bucket-addressed cloud stores (`gs://`, `s3://`).
///
/// Holds one `object_store` client per bucket, created lazily through a
/// [`BucketConnector`]. Native digests come from single-part ETags.
pub struct ObjectStoreBackend {
    scheme: Scheme,
    connector: Arc<dyn BucketConnector>,
    buckets: RwLock<HashMap<String, BucketHandle>>,
    tool: Option<TransferTool>,
}

impl ObjectStoreBackend {
    pub fn new(scheme: Scheme, connector: impl BucketConnector + 'static) -> Self {
        Self {
            scheme,
            connector: Arc::new(connector),
            buckets: RwLock::new(HashMap::new()),
            tool: None,
        }
    }

    /// `gs://` backend; enables `gsutil` for gs<->s3 copies if configured.
    pub fn gcs(config: &GcsConfig) -> Self {
        let backend = Self::new(Scheme::Gcs, GcsConnector::new(config.clone()));
        if config.use_gsutil_for_s3 {
            backend.with_transfer_tool(TransferTool::gsutil(&config.gsutil_path))
        } else {
            backend
        }
    }

    pub fn s3(config: &S3Config) -> Self {
        Self::new(Scheme::S3, S3Connector::new(config.clone()))
    }

    pub fn in_memory(scheme: Scheme) -> Self {
        Self::new(scheme, InMemoryConnector)
    }

    /// Route copies this backend cannot perform natively through an external tool.
    pub fn with_transfer_tool(mut self, tool: TransferTool) -> Self {
        self.tool = Some(tool);
        self
    }

    fn handle(&self, uri: &Uri) -> BackendResult<(BucketHandle, StorePath)> {
        let bucket = match uri.bucket() {
            Some(bucket) if uri.scheme() == self.scheme => bucket,
            _ => {
                return Err(BackendError::Unsupported(format!(
                    "{} backend cannot address {uri}",
                    self.scheme
                )))
            }
        };
        let path = StorePath::from(uri.path());

        if let Some(handle) = self.buckets.read().expect("lock poisoned").get(bucket) {
            return Ok((handle.clone(), path));
        }
        let handle = self.connector.connect(bucket)?;
        debug!(scheme = %self.scheme, bucket, "connected bucket client");
        let mut buckets = self.buckets.write().expect("lock poisoned");
        let handle = buckets.entry(bucket.to_string()).or_insert(handle).clone();
        Ok((handle, path))
    }
}

fn map_store_error(uri: &Uri, err: object_store::Error) -> BackendError {
    match err {
        object_store::Error::NotFound { .. } => BackendError::NotFound(uri.clone()),
        object_store::Error::NotSupported { .. } | object_store::Error::NotImplemented => {
            BackendError::Unsupported(format!("{uri}: {err}"))
        }
        other => BackendError::remote(uri, other),
    }
}

/// Interpret a `PutMode::Create` result.
///
/// A store without conditional puts fails here; it never degrades to a
/// check-then-write.
fn create_outcome(uri: &Uri, result: object_store::Result<PutResult>) -> BackendResult<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(object_store::Error::AlreadyExists { .. }) => Ok(false),
        Err(e @ (object_store::Error::NotImplemented | object_store::Error::NotSupported { .. })) => {
            warn!(%uri, error = %e, "store cannot create objects atomically");
            Err(BackendError::Unsupported(format!(
                "{uri}: conditional create unavailable ({e})"
            )))
        }
        Err(e) => Err(map_store_error(uri, e)),
    }
}

#[async_trait]
impl Backend for ObjectStoreBackend {
    fn name(&self) -> &'static str {
        match self.scheme {
            Scheme::Gcs => "gcs",
            Scheme::S3 => "s3",
            _ => "object-store",
        }
    }

    async fn exists(&self, uri: &Uri) -> BackendResult<bool> {
        match self.stat(uri).await {
            Ok(_) => Ok(true),
            Err(BackendError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn stat(&self, uri: &Uri) -> BackendResult<Metadata> {
        let (handle, path) = self.handle(uri)?;
        let meta = handle
            .store
            .head(&path)
            .await
            .map_err(|e| map_store_error(uri, e))?;
        let digest = meta.e_tag.as_deref().and_then(ContentDigest::from_etag);
        Ok(Metadata::new(meta.size as u64, meta.last_modified).with_content_hash(digest))
    }

    async fn read(&self, uri: &Uri) -> BackendResult<Bytes> {
        let (handle, path) = self.handle(uri)?;
        let result = handle
            .store
            .get(&path)
            .await
            .map_err(|e| map_store_error(uri, e))?;
        result.bytes().await.map_err(|e| map_store_error(uri, e))
    }

    async fn write(&self, uri: &Uri, data: Bytes) -> BackendResult<()> {
        let (handle, path) = self.handle(uri)?;
        let len = data.len();
        handle
            .store
            .put(&path, PutPayload::from(data))
            .await
            .map_err(|e| map_store_error(uri, e))?;
        debug!(%uri, bytes = len, "object write");
        Ok(())
    }

    async fn write_if_absent(&self, uri: &Uri, data: Bytes) -> BackendResult<bool> {
        let (handle, path) = self.handle(uri)?;
        let opts = PutOptions {
            mode: PutMode::Create,
            ..Default::default()
        };
        let result = handle
            .store
            .put_opts(&path, PutPayload::from(data), opts)
            .await;
        create_outcome(uri, result)
    }

    async fn copy(&self, source: &Uri, destination: &Uri) -> BackendResult<()> {
        let same_bucket = source.scheme() == self.scheme
            && destination.scheme() == self.scheme
            && source.bucket() == destination.bucket();
        if same_bucket {
            let (handle, from) = self.handle(source)?;
            let to = StorePath::from(destination.path());
            handle
                .store
                .copy(&from, &to)
                .await
                .map_err(|e| map_store_error(source, e))?;
            debug!(%source, %destination, "object copy");
            return Ok(());
        }
        if let Some(tool) = &self.tool {
            if tool.bridges(source, destination) {
                return tool.copy(source, destination).await;
            }
        }
        Err(BackendError::Unsupported(format!(
            "{} backend cannot copy {source} to {destination}",
            self.scheme
        )))
    }

    async fn remove(&self, uri: &Uri) -> BackendResult<bool> {
        let (handle, path) = self.handle(uri)?;
        match handle.store.delete(&path).await {
            Ok(()) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(map_store_error(uri, e)),
        }
    }

    async fn presign(&self, uri: &Uri, expires_in: Duration) -> BackendResult<String> {
        let (handle, path) = self.handle(uri)?;
        let signer = handle.signer.ok_or_else(|| {
            BackendError::Unsupported(format!("no signing credentials for {uri}"))
        })?;
        let url = signer
            .signed_url(::http::Method::GET, &path, expires_in)
            .await
            .map_err(|e| map_store_error(uri, e))?;
        Ok(url.to_string())
    }
}

impl std::fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let buckets = self.buckets.read().expect("lock poisoned").len();
        f.debug_struct("ObjectStoreBackend")
            .field("scheme", &self.scheme)
            .field("connector", &self.connector)
            .field("connected_buckets", &buckets)
            .field("tool", &self.tool)
            .finish()
    }
}
