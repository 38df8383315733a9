use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use stowage_types::Uri;

use crate::content::ContentType;
use crate::delimited::as_candidate;
use crate::error::{WalkError, WalkResult};

/// A parsed JSON document. Object key order is preserved.
#[derive(Clone, Debug, PartialEq)]
pub struct JsonDocument {
    root: Value,
}

impl JsonDocument {
    pub fn parse(data: &[u8]) -> WalkResult<Self> {
        let root = serde_json::from_slice(data).map_err(|e| WalkError::Unparsable {
            content_type: ContentType::Json,
            reason: e.to_string(),
        })?;
        Ok(Self { root })
    }

    /// String values that are URIs, in document order, repeats included.
    pub fn candidates(&self) -> Vec<Uri> {
        let mut found = Vec::new();
        collect(&self.root, &mut found);
        found
    }

    /// Substitute every URI value `f` maps. Returns the number of values
    /// changed.
    pub fn substitute(&mut self, f: &dyn Fn(&Uri) -> Option<String>) -> usize {
        substitute(&mut self.root, f)
    }

    /// Pretty-printed with four-space indentation.
    pub fn to_bytes(&self) -> WalkResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut ser =
            serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
        self.root
            .serialize(&mut ser)
            .map_err(|e| WalkError::Unparsable {
                content_type: ContentType::Json,
                reason: e.to_string(),
            })?;
        Ok(out)
    }
}

fn collect(value: &Value, found: &mut Vec<Uri>) {
    match value {
        Value::String(s) => found.extend(as_candidate(s)),
        Value::Array(items) => items.iter().for_each(|v| collect(v, found)),
        Value::Object(map) => map.values().for_each(|v| collect(v, found)),
        _ => {}
    }
}

fn substitute(value: &mut Value, f: &dyn Fn(&Uri) -> Option<String>) -> usize {
    match value {
        Value::String(s) => match as_candidate(s).and_then(|uri| f(&uri)) {
            Some(replacement) if *s != replacement => {
                *s = replacement;
                1
            }
            _ => 0,
        },
        Value::Array(items) => items.iter_mut().map(|v| substitute(v, f)).sum(),
        Value::Object(map) => map.values_mut().map(|v| substitute(v, f)).sum(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_only() {
        let doc = JsonDocument::parse(
            br#"{"gs://bucket/key.txt": 1, "input": "gs://bucket/a.txt", "n": [2, "s3://b/c.json", {"x": "/abs/not-prefixed"}]}"#,
        )
        .unwrap();
        let found: Vec<String> = doc.candidates().iter().map(Uri::to_string).collect();
        assert_eq!(found, vec!["gs://bucket/a.txt", "s3://b/c.json"]);
    }

    #[test]
    fn substitution_preserves_key_order() {
        let mut doc = JsonDocument::parse(br#"{"z": "gs://b/a.txt", "a": true}"#).unwrap();
        let changed = doc.substitute(&|_| Some("local:///out/a.txt".to_string()));
        assert_eq!(changed, 1);
        let text = String::from_utf8(doc.to_bytes().unwrap()).unwrap();
        assert_eq!(
            text,
            "{\n    \"z\": \"local:///out/a.txt\",\n    \"a\": true\n}"
        );
    }

    #[test]
    fn malformed_json_is_unparsable() {
        let err = JsonDocument::parse(b"{\"a\": ").unwrap_err();
        assert!(matches!(
            err,
            WalkError::Unparsable {
                content_type: ContentType::Json,
                ..
            }
        ));
    }

    #[test]
    fn scalar_documents_are_allowed() {
        let mut doc = JsonDocument::parse(b"\"gs://b/a.txt\"").unwrap();
        assert_eq!(doc.candidates().len(), 1);
        doc.substitute(&|_| Some("s3://b/a.txt".to_string()));
        assert_eq!(doc.to_bytes().unwrap(), b"\"s3://b/a.txt\"");
    }
}
