use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use stowage_backend::{Backend, BackendError, BackendRegistry};
use stowage_types::Uri;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::LockConfig;
use crate::error::{LockError, LockResult};
use crate::marker::{is_older_than, marker_uri, LockMarker};

/// What an existing marker means for an acquirer.
enum Holder {
    /// The marker disappeared before it could be inspected.
    Gone,
    Live,
    Stale(Option<LockMarker>),
}

/// Acquires and releases destination locks through the destination's backend.
#[derive(Clone, Debug)]
pub struct LockManager {
    registry: BackendRegistry,
    config: LockConfig,
}

impl LockManager {
    pub fn new(registry: BackendRegistry, config: LockConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Acquire with the configured timeout and TTL.
    pub async fn acquire(&self, destination: &Uri) -> LockResult<LockHandle> {
        self.acquire_with(destination, self.config.timeout(), self.config.ttl())
            .await
    }

    /// Acquire the lock on `destination`, waiting up to `timeout` for a live
    /// holder to release it. The new marker carries `ttl`.
    ///
    /// A stale marker is removed and acquisition retried at once. Between
    /// attempts the wait doubles from the configured poll interval up to its
    /// maximum, with random jitter.
    pub async fn acquire_with(
        &self,
        destination: &Uri,
        timeout: Duration,
        ttl: Duration,
    ) -> LockResult<LockHandle> {
        let marker_uri = marker_uri(destination);
        let backend = self.registry.resolve(&marker_uri)?;
        let deadline = Instant::now() + timeout;
        let mut delay = self.config.poll_interval();
        let mut stale_overrides = 0u32;

        loop {
            let marker = LockMarker::new(ttl);
            if backend.write_if_absent(&marker_uri, marker.to_bytes()?).await? {
                debug!(%destination, owner = %marker.owner_id, "lock acquired");
                return Ok(LockHandle {
                    destination: destination.clone(),
                    marker_uri,
                    owner_id: marker.owner_id,
                    backend,
                    stale_overrides,
                    released: false,
                });
            }

            match inspect(backend.as_ref(), &marker_uri, ttl).await? {
                Holder::Gone => continue,
                Holder::Stale(previous) => {
                    warn!(
                        %destination,
                        previous_owner = ?previous.as_ref().map(|m| m.owner_id),
                        acquired_at = ?previous.as_ref().map(|m| m.acquired_at),
                        "overriding stale lock"
                    );
                    backend.remove(&marker_uri).await?;
                    stale_overrides += 1;
                    continue;
                }
                Holder::Live => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::Timeout {
                    destination: destination.clone(),
                    waited: timeout,
                });
            }
            let wait = jittered(delay).min(deadline - now);
            debug!(%destination, wait_ms = wait.as_millis() as u64, "lock busy, backing off");
            tokio::time::sleep(wait).await;
            delay = (delay * 2).min(self.config.max_poll_interval());
        }
    }

    /// Release a handle; see [`LockHandle::release`].
    pub async fn release(&self, handle: LockHandle) -> LockResult<()> {
        handle.release().await
    }

    /// The marker currently guarding `destination`, if any.
    ///
    /// Returns `None` for an absent marker and for one that cannot be decoded.
    pub async fn current(&self, destination: &Uri) -> LockResult<Option<LockMarker>> {
        let marker_uri = marker_uri(destination);
        let backend = self.registry.resolve(&marker_uri)?;
        Ok(read_marker(backend.as_ref(), &marker_uri)
            .await?
            .and_then(Result::ok))
    }

    /// Remove the marker on `destination` regardless of its owner.
    pub async fn force_release(&self, destination: &Uri) -> LockResult<bool> {
        let marker_uri = marker_uri(destination);
        let backend = self.registry.resolve(&marker_uri)?;
        let removed = backend.remove(&marker_uri).await?;
        if removed {
            warn!(%destination, "lock marker force-removed");
        }
        Ok(removed)
    }
}

/// Read and decode a marker. Outer `None`: absent. Inner `Err`: undecodable.
async fn read_marker(
    backend: &dyn Backend,
    marker_uri: &Uri,
) -> LockResult<Option<Result<LockMarker, LockError>>> {
    match backend.read(marker_uri).await {
        Ok(data) => Ok(Some(LockMarker::from_bytes(&data))),
        Err(BackendError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn inspect(backend: &dyn Backend, marker_uri: &Uri, ttl: Duration) -> LockResult<Holder> {
    let now = Utc::now();
    match read_marker(backend, marker_uri).await? {
        None => Ok(Holder::Gone),
        Some(Ok(marker)) if marker.is_stale(now) => Ok(Holder::Stale(Some(marker))),
        Some(Ok(_)) => Ok(Holder::Live),
        Some(Err(_)) => {
            // Undecodable marker: judge its age by the backend mtime.
            match backend.stat(marker_uri).await {
                Ok(meta) if is_older_than(meta.mtime, ttl, now) => Ok(Holder::Stale(None)),
                Ok(_) => Ok(Holder::Live),
                Err(BackendError::NotFound(_)) => Ok(Holder::Gone),
                Err(e) => Err(e.into()),
            }
        }
    }
}

fn jittered(delay: Duration) -> Duration {
    let spread = (delay.as_millis() / 4) as u64;
    if spread == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}

/// Proof of holding the lock on one destination.
///
/// Must be released with [`LockHandle::release`]; dropping an unreleased
/// handle leaves the marker in place until it goes stale.
#[derive(Debug)]
pub struct LockHandle {
    destination: Uri,
    marker_uri: Uri,
    owner_id: Uuid,
    backend: Arc<dyn Backend>,
    stale_overrides: u32,
    released: bool,
}

impl LockHandle {
    pub fn destination(&self) -> &Uri {
        &self.destination
    }

    pub fn marker_uri(&self) -> &Uri {
        &self.marker_uri
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    /// Whether acquiring this lock removed a stale marker.
    pub fn overrode_stale(&self) -> bool {
        self.stale_overrides > 0
    }

    pub fn stale_overrides(&self) -> u32 {
        self.stale_overrides
    }

    /// Delete the marker if this handle still owns it.
    ///
    /// An absent marker is not an error. A marker now owned by someone else
    /// (ours went stale and was taken over) is left in place.
    pub async fn release(mut self) -> LockResult<()> {
        self.released = true;
        match read_marker(self.backend.as_ref(), &self.marker_uri).await? {
            None => {
                debug!(destination = %self.destination, "lock already released");
            }
            Some(Ok(marker)) if marker.owner_id == self.owner_id => {
                self.backend.remove(&self.marker_uri).await?;
                debug!(destination = %self.destination, owner = %self.owner_id, "lock released");
            }
            Some(_) => {
                warn!(
                    destination = %self.destination,
                    owner = %self.owner_id,
                    "lock marker is held by another owner, leaving it"
                );
            }
        }
        Ok(())
    }

    /// Give up the handle without removing the marker.
    pub fn detach(mut self) -> Uuid {
        self.released = true;
        self.owner_id
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if !self.released {
            warn!(destination = %self.destination, "lock handle dropped without release");
        }
    }
}
