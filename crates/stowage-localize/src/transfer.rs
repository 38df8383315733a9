use std::path::PathBuf;

use stowage_backend::{Backend, BackendError, BackendRegistry, LocalBackend};
use stowage_types::{Scheme, Uri};
use tracing::{debug, warn};

use crate::config::LocalizeConfig;
use crate::error::{LocalizeError, LocalizeResult};

/// How an object was moved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// A backend copied it without the bytes passing through this process.
    Native,
    /// Read into memory and written out; one endpoint was local or both
    /// shared a scheme.
    Direct,
    /// Downloaded to a local temp dir, then uploaded.
    Staged,
}

/// Moves single objects between any two registered backends.
///
/// Routes are tried in order: the destination backend's copy, the source
/// backend's copy, a direct read and write, then local staging.
#[derive(Clone, Debug)]
pub struct Transfer {
    registry: BackendRegistry,
    local: LocalBackend,
    allow_local_staging: bool,
    staging_dir: Option<PathBuf>,
}

impl Transfer {
    pub fn new(registry: BackendRegistry, config: &LocalizeConfig) -> Self {
        Self {
            registry,
            local: LocalBackend::new(),
            allow_local_staging: config.allow_local_staging,
            staging_dir: config.staging_dir.clone(),
        }
    }

    pub async fn copy(&self, source: &Uri, destination: &Uri) -> LocalizeResult<Route> {
        if destination.scheme().is_read_only() {
            return Err(unsupported(source, destination, "destination is read-only"));
        }
        let dst_backend = self.registry.resolve(destination)?;
        let src_backend = self.registry.resolve(source)?;

        if try_native(dst_backend.as_ref(), source, destination).await? {
            return Ok(Route::Native);
        }
        if source.scheme() != destination.scheme()
            && try_native(src_backend.as_ref(), source, destination).await?
        {
            return Ok(Route::Native);
        }

        let local_endpoint = source.scheme() == Scheme::Local || destination.scheme() == Scheme::Local;
        if local_endpoint || source.scheme() == destination.scheme() {
            let data = src_backend.read(source).await?;
            dst_backend.write(destination, data).await?;
            return Ok(Route::Direct);
        }

        if !self.allow_local_staging {
            return Err(unsupported(
                source,
                destination,
                "no backend can copy directly and local staging is disabled",
            ));
        }
        warn!(%source, %destination, "no direct copy, staging through local disk");
        self.staged(src_backend.as_ref(), dst_backend.as_ref(), source, destination)
            .await?;
        Ok(Route::Staged)
    }

    async fn staged(
        &self,
        src_backend: &dyn Backend,
        dst_backend: &dyn Backend,
        source: &Uri,
        destination: &Uri,
    ) -> LocalizeResult<()> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("stowage-staging-");
        let dir = match &self.staging_dir {
            Some(root) => {
                tokio::fs::create_dir_all(root)
                    .await
                    .map_err(BackendError::Io)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(BackendError::Io)?;

        let name = match source.basename() {
            "" => "object",
            base => base,
        };
        let staged = Uri::from_local_path(dir.path().join(name))?;
        debug!(%source, %staged, "staging");

        let data = src_backend.read(source).await?;
        self.local.write(&staged, data).await?;
        let data = self.local.read(&staged).await?;
        dst_backend.write(destination, data).await?;
        Ok(())
    }
}

/// `Ok(false)` when the backend cannot bridge the pair.
async fn try_native(backend: &dyn Backend, source: &Uri, destination: &Uri) -> LocalizeResult<bool> {
    match backend.copy(source, destination).await {
        Ok(()) => Ok(true),
        Err(BackendError::Unsupported(reason)) => {
            debug!(backend = backend.name(), %reason, "native copy unavailable");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

fn unsupported(source: &Uri, destination: &Uri, reason: &str) -> LocalizeError {
    LocalizeError::CrossSchemeUnsupported {
        from: source.clone(),
        to: destination.clone(),
        reason: reason.to_string(),
    }
}
