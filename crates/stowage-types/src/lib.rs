//! Foundation types for stowage.
//!
//! This crate provides the value types shared by every other stowage crate.
//!
//! # Key Types
//!
//! - [`Uri`] -- Scheme-qualified identifier of one storage object
//! - [`Scheme`] -- The closed set of storage schemes (local, gs, s3, http)
//! - [`ContentDigest`] -- MD5 content hash, the form cloud stores report natively
//! - [`Metadata`] -- Size, modification time, and optional digest of an object

pub mod digest;
pub mod error;
pub mod metadata;
pub mod uri;

pub use digest::{ContentDigest, DigestHasher};
pub use error::TypeError;
pub use metadata::Metadata;
pub use uri::{Scheme, Uri};
