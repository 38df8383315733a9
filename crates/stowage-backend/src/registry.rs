use std::collections::HashMap;
use std::sync::Arc;

use stowage_types::{Scheme, Uri};

use crate::config::BackendConfig;
use crate::error::{BackendError, BackendResult};
use crate::local::LocalBackend;
use crate::object::ObjectStoreBackend;
use crate::traits::Backend;
use crate::web::HttpBackend;

/// Scheme-to-backend dispatch table.
#[derive(Clone, Debug, Default)]
pub struct BackendRegistry {
    backends: HashMap<Scheme, Arc<dyn Backend>>,
}

impl BackendRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every built-in backend from an explicit configuration.
    ///
    /// Cloud clients connect lazily, so this does not touch the network.
    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let http: Arc<dyn Backend> = Arc::new(HttpBackend::new(&config.http)?);
        Ok(Self::new()
            .with_backend(Scheme::Local, Arc::new(LocalBackend::new()))
            .with_backend(Scheme::Gcs, Arc::new(ObjectStoreBackend::gcs(&config.gcs)))
            .with_backend(Scheme::S3, Arc::new(ObjectStoreBackend::s3(&config.s3)))
            .with_backend(Scheme::Http, http.clone())
            .with_backend(Scheme::Https, http))
    }

    pub fn with_backend(mut self, scheme: Scheme, backend: Arc<dyn Backend>) -> Self {
        self.register(scheme, backend);
        self
    }

    /// Register (or replace) the backend serving `scheme`.
    pub fn register(&mut self, scheme: Scheme, backend: Arc<dyn Backend>) {
        self.backends.insert(scheme, backend);
    }

    pub fn get(&self, scheme: Scheme) -> Option<&Arc<dyn Backend>> {
        self.backends.get(&scheme)
    }

    /// The backend for a URI's scheme.
    pub fn resolve(&self, uri: &Uri) -> BackendResult<Arc<dyn Backend>> {
        self.backends
            .get(&uri.scheme())
            .cloned()
            .ok_or(BackendError::NoBackend(uri.scheme()))
    }

    pub fn schemes(&self) -> Vec<Scheme> {
        let mut schemes: Vec<Scheme> = self.backends.keys().copied().collect();
        schemes.sort();
        schemes
    }
}
