//! Localization engine for stowage.
//!
//! [`Localizer::localize`] copies a source object into a target directory on
//! any backend, re-rooting its relative path. For structured documents
//! (TSV, CSV, JSON) it first localizes every URI the document references and
//! writes a rewritten copy that points at the localized children.
//!
//! Every write to a destination happens under that destination's lock, and
//! is skipped when the transfer cache shows the destination already holds
//! the same content. Repeating a call against unchanged storage therefore
//! performs no transfers.
//!
//! # Errors
//!
//! All failures surface as [`LocalizeError`]; [`LocalizeError::kind`] gives
//! the flat [`ErrorKind`]. Children localized before a failure are left in
//! place.

pub mod config;
pub mod error;
pub mod localizer;
pub mod manifest;
pub mod report;
pub mod transfer;

pub use config::{LocalizeConfig, StowageConfig};
pub use error::{ConfigError, ErrorKind, LocalizeError, LocalizeResult};
pub use localizer::Localizer;
pub use manifest::Manifest;
pub use report::{LocalizeReport, Localized};
pub use transfer::Transfer;
