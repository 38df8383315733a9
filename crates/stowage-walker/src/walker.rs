use std::collections::HashSet;

use bytes::Bytes;
use stowage_types::Uri;
use tracing::debug;

use crate::content::{ContentType, ExtensionMap};
use crate::delimited::Table;
use crate::error::WalkResult;
use crate::json::JsonDocument;

/// A parsed structured document.
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedContent {
    Table(Table),
    Json(JsonDocument),
}

impl ParsedContent {
    pub fn parse(data: &[u8], content_type: ContentType) -> WalkResult<Self> {
        match content_type {
            ContentType::Tsv | ContentType::Csv => Ok(Self::Table(Table::parse(data, content_type)?)),
            ContentType::Json => Ok(Self::Json(JsonDocument::parse(data)?)),
        }
    }

    /// Distinct URIs referenced by the document, in first-seen order.
    pub fn candidates(&self) -> Vec<Uri> {
        let all: Vec<Uri> = match self {
            Self::Table(table) => table.candidates().collect(),
            Self::Json(doc) => doc.candidates(),
        };
        let mut seen = HashSet::new();
        all.into_iter().filter(|uri| seen.insert(uri.clone())).collect()
    }

    /// Substitute references and serialize. Returns the number of fields or
    /// values changed alongside the bytes.
    pub fn render(mut self, f: &dyn Fn(&Uri) -> Option<String>) -> WalkResult<(Vec<u8>, usize)> {
        match &mut self {
            Self::Table(table) => {
                let changed = table.substitute(f);
                Ok((table.to_bytes(), changed))
            }
            Self::Json(doc) => {
                let changed = doc.substitute(f);
                Ok((doc.to_bytes()?, changed))
            }
        }
    }
}

/// Result of rewriting one document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rewritten {
    /// New document bytes; the input bytes unchanged when nothing was
    /// substituted.
    pub bytes: Bytes,
    /// Distinct URIs the document references, in first-seen order.
    pub children: Vec<Uri>,
    /// Number of fields or values substituted.
    pub changed: usize,
}

/// Rewrite `content` as `content_type`, replacing every referenced URI that
/// `f` maps with the returned string.
///
/// When nothing changes the original bytes are returned as-is, so an
/// untouched JSON document keeps its formatting.
pub fn rewrite(
    content: Bytes,
    content_type: ContentType,
    f: &dyn Fn(&Uri) -> Option<String>,
) -> WalkResult<Rewritten> {
    let parsed = ParsedContent::parse(&content, content_type)?;
    let children = parsed.candidates();
    let (rendered, changed) = parsed.render(f)?;
    debug!(%content_type, children = children.len(), changed, "rewrote document");
    let bytes = if changed == 0 {
        content
    } else {
        Bytes::from(rendered)
    };
    Ok(Rewritten {
        bytes,
        children,
        changed,
    })
}

/// Entry point combining format detection with parsing and rewriting.
#[derive(Clone, Debug, Default)]
pub struct StructuredWalker {
    extensions: ExtensionMap,
}

impl StructuredWalker {
    pub fn new(extensions: ExtensionMap) -> Self {
        Self { extensions }
    }

    pub fn extensions(&self) -> &ExtensionMap {
        &self.extensions
    }

    /// The structured format of `uri`, if it has one.
    pub fn content_type(&self, uri: &Uri) -> Option<ContentType> {
        self.extensions.detect(uri)
    }

    /// Parse and list the distinct references of a document.
    pub fn children(&self, content: &[u8], content_type: ContentType) -> WalkResult<Vec<Uri>> {
        Ok(ParsedContent::parse(content, content_type)?.candidates())
    }

    pub fn rewrite(
        &self,
        content: Bytes,
        content_type: ContentType,
        f: &dyn Fn(&Uri) -> Option<String>,
    ) -> WalkResult<Rewritten> {
        rewrite(content, content_type, f)
    }
}
