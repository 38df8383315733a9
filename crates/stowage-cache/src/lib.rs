//! Transfer cache for stowage.
//!
//! Decides whether a copy can be skipped by comparing content digests of
//! source and destination. Size and modification time are never treated as
//! proof of equality.
//!
//! After a transfer the digest that was written is recorded in a
//! `<destination>.md5` sidecar, so a later run can compare against the record
//! instead of re-hashing the destination.

pub mod cache;
pub mod error;

pub use cache::{record_uri, CacheDecision, TransferCache, RECORD_SUFFIX};
pub use error::{CacheError, CacheResult};
