//! Storage backends for stowage.
//!
//! Every storage scheme is served by one implementation of the [`Backend`]
//! trait. The localization engine only ever talks to this trait; the
//! backends themselves are thin mappings onto a filesystem or vendor API.
//!
//! # Backends
//!
//! - [`LocalBackend`] -- local filesystem (`local://`)
//! - [`ObjectStoreBackend`] -- `gs://` and `s3://`, one `object_store` client per bucket
//! - [`HttpBackend`] -- read-only `http://` / `https://`
//! - [`InMemoryBackend`] -- `HashMap`-based backend for tests and embedding
//!
//! Backends are registered per scheme in a [`BackendRegistry`], built once
//! from an explicit [`BackendConfig`]. Dispatch happens on the URI scheme;
//! there is no global client state.
//!
//! # Design Rules
//!
//! 1. `write` never exposes a partially written object at the destination.
//! 2. `write_if_absent` is atomic on object stores; a store without
//!    conditional creates fails with [`BackendError::Unsupported`].
//! 3. `copy` returns [`BackendError::Unsupported`] for pairs it cannot bridge;
//!    the caller decides how to fall back.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod config;
pub mod error;
pub mod local;
pub mod memory;
pub mod object;
pub mod registry;
pub mod tool;
pub mod traits;
pub mod web;

pub use config::{BackendConfig, GcsConfig, HttpConfig, S3Config};
pub use error::{BackendError, BackendResult};
pub use local::LocalBackend;
pub use memory::InMemoryBackend;
pub use object::{
    BucketConnector, BucketHandle, GcsConnector, InMemoryConnector, ObjectStoreBackend,
    S3Connector,
};
pub use registry::BackendRegistry;
pub use tool::TransferTool;
pub use traits::Backend;
pub use web::HttpBackend;
