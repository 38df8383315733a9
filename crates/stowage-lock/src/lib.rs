//! Destination locks for stowage.
//!
//! A lock on a destination URI is a small JSON marker object stored next to
//! it (`<destination>.lock`) on the destination's own backend. Creating the
//! marker with a conditional write is the acquire step; deleting it is the
//! release step. Because the marker lives in durable storage, the lock is
//! honored across threads, processes, and machines sharing that storage.
//!
//! A holder that crashes leaves its marker behind. Once the marker is older
//! than its TTL any waiter may remove it and take over; this trades strict
//! safety for liveness and is reported through
//! [`LockHandle::overrode_stale`].

pub mod config;
pub mod error;
pub mod manager;
pub mod marker;

pub use config::LockConfig;
pub use error::{LockError, LockResult};
pub use manager::{LockHandle, LockManager};
pub use marker::{marker_uri, LockMarker, LOCK_SUFFIX};
