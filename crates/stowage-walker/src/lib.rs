//! Structured content walker for stowage.
//!
//! Parses delimited text tables and JSON documents, lists every field or
//! value that is itself a storage URI, and produces a copy of the document
//! with those references substituted. Non-URI content passes through
//! untouched; JSON keys are never rewritten.
//!
//! The walker does not move any data. The caller localizes the discovered
//! children first and hands the resulting mapping to [`rewrite`].

pub mod content;
pub mod delimited;
pub mod error;
pub mod json;
pub mod walker;

pub use content::{ContentType, ExtensionMap};
pub use error::{WalkError, WalkResult};
pub use walker::{rewrite, ParsedContent, Rewritten, StructuredWalker};
