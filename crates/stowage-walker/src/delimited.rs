use stowage_types::Uri;

use crate::content::ContentType;
use crate::error::{WalkError, WalkResult};

/// One line of a delimited table with its original line ending.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Row {
    fields: Vec<String>,
    ending: &'static str,
}

/// A delimited text table that reproduces its input byte for byte when no
/// field is substituted. Line endings (`\n`, `\r\n`, none on the last line)
/// are kept per row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Table {
    delimiter: char,
    rows: Vec<Row>,
}

impl Table {
    pub fn parse(data: &[u8], content_type: ContentType) -> WalkResult<Self> {
        let delimiter = content_type.delimiter().ok_or_else(|| WalkError::Unparsable {
            content_type,
            reason: "not a delimited format".to_string(),
        })?;
        let text = std::str::from_utf8(data).map_err(|e| WalkError::Unparsable {
            content_type,
            reason: e.to_string(),
        })?;

        let rows = text
            .split_inclusive('\n')
            .map(|line| {
                let (body, ending) = if let Some(body) = line.strip_suffix("\r\n") {
                    (body, "\r\n")
                } else if let Some(body) = line.strip_suffix('\n') {
                    (body, "\n")
                } else {
                    (line, "")
                };
                Row {
                    fields: body.split(delimiter).map(str::to_string).collect(),
                    ending,
                }
            })
            .collect();
        Ok(Self { delimiter, rows })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Fields that are URIs, in table order, repeats included.
    pub fn candidates(&self) -> impl Iterator<Item = Uri> + '_ {
        self.rows
            .iter()
            .flat_map(|row| row.fields.iter())
            .filter_map(|field| as_candidate(field))
    }

    /// Substitute every URI field `f` maps. Returns the number of fields
    /// changed.
    pub fn substitute(&mut self, f: &dyn Fn(&Uri) -> Option<String>) -> usize {
        let mut changed = 0;
        for field in self.rows.iter_mut().flat_map(|row| row.fields.iter_mut()) {
            if let Some(replacement) = as_candidate(field).and_then(|uri| f(&uri)) {
                if *field != replacement {
                    *field = replacement;
                    changed += 1;
                }
            }
        }
        changed
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        let mut sep = [0u8; 4];
        let sep: &str = self.delimiter.encode_utf8(&mut sep);
        for row in &self.rows {
            out.push_str(&row.fields.join(sep));
            out.push_str(row.ending);
        }
        out.into_bytes()
    }
}

/// A string is a candidate only if it is, in full, a URI with a known prefix.
pub(crate) fn as_candidate(value: &str) -> Option<Uri> {
    if !Uri::has_known_prefix(value) {
        return None;
    }
    Uri::parse(value).ok()
}
