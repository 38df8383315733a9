use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use stowage_types::Uri;

/// Structured formats the walker can rewrite.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Tab-delimited table.
    Tsv,
    /// Comma-delimited table. Fields are split on every comma; quoting is
    /// not interpreted.
    Csv,
    /// JSON document; only values are candidates, never keys.
    Json,
}

impl ContentType {
    /// Field delimiter for table formats.
    pub fn delimiter(&self) -> Option<char> {
        match self {
            Self::Tsv => Some('\t'),
            Self::Csv => Some(','),
            Self::Json => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Tsv => "tsv",
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// File extension to content type lookup. Extensions are matched
/// case-insensitively and without the leading dot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionMap {
    map: HashMap<String, ContentType>,
}

impl Default for ExtensionMap {
    fn default() -> Self {
        Self::empty()
            .with("json", ContentType::Json)
            .with("tsv", ContentType::Tsv)
            .with("csv", ContentType::Csv)
    }
}

impl ExtensionMap {
    pub fn empty() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    pub fn with(mut self, extension: &str, content_type: ContentType) -> Self {
        self.insert(extension, content_type);
        self
    }

    pub fn insert(&mut self, extension: &str, content_type: ContentType) {
        let key = extension.trim_start_matches('.').to_ascii_lowercase();
        self.map.insert(key, content_type);
    }

    pub fn remove(&mut self, extension: &str) -> Option<ContentType> {
        let key = extension.trim_start_matches('.').to_ascii_lowercase();
        self.map.remove(&key)
    }

    pub fn get(&self, extension: &str) -> Option<ContentType> {
        self.map.get(&extension.to_ascii_lowercase()).copied()
    }

    /// Content type of the object a URI names, from its extension.
    pub fn detect(&self, uri: &Uri) -> Option<ContentType> {
        uri.extension().and_then(|ext| self.get(ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_extensions() {
        let map = ExtensionMap::default();
        let detect = |s: &str| map.detect(&Uri::parse(s).unwrap());
        assert_eq!(detect("gs://b/x/inputs.json"), Some(ContentType::Json));
        assert_eq!(detect("/data/t.TSV"), Some(ContentType::Tsv));
        assert_eq!(detect("https://host/t.csv?sig=abc"), Some(ContentType::Csv));
        assert_eq!(detect("s3://b/reads.fastq.gz"), None);
        assert_eq!(detect("/data/noext"), None);
    }

    #[test]
    fn extensions_are_configurable() {
        let mut map = ExtensionMap::default().with(".tab", ContentType::Tsv);
        assert_eq!(map.remove("csv"), Some(ContentType::Csv));
        assert_eq!(map.get("tab"), Some(ContentType::Tsv));
        assert_eq!(map.get("csv"), None);
    }

    #[test]
    fn delimiters() {
        assert_eq!(ContentType::Tsv.delimiter(), Some('\t'));
        assert_eq!(ContentType::Csv.delimiter(), Some(','));
        assert_eq!(ContentType::Json.delimiter(), None);
        assert_eq!(ContentType::Json.to_string(), "json");
    }
}
