use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Storage scheme of a [`Uri`]. Each scheme resolves to exactly one backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Local filesystem (`local:///abs/path`, also `file://` and bare `/abs/path`).
    Local,
    /// Google Cloud Storage (`gs://bucket/key`).
    Gcs,
    /// Amazon S3 (`s3://bucket/key`).
    S3,
    /// Read-only plain HTTP (`http://host/path`).
    Http,
    /// Read-only HTTPS (`https://host/path`).
    Https,
}

impl Scheme {
    /// Every scheme, in prefix-matching order.
    pub const ALL: [Scheme; 5] = [
        Scheme::Local,
        Scheme::Gcs,
        Scheme::S3,
        Scheme::Http,
        Scheme::Https,
    ];

    /// Canonical URI prefix.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Local => "local://",
            Self::Gcs => "gs://",
            Self::S3 => "s3://",
            Self::Http => "http://",
            Self::Https => "https://",
        }
    }

    /// Short name used in configuration and CLI output.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Gcs => "gs",
            Self::S3 => "s3",
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    /// Marker inserted before the extension of a rewritten copy that would
    /// otherwise land on its own source (`j1.json` -> `j1.gcs.json`).
    pub fn rewrite_suffix(&self) -> &'static str {
        match self {
            Self::Local => ".local",
            Self::Gcs => ".gcs",
            Self::S3 => ".s3",
            Self::Http | Self::Https => ".url",
        }
    }

    /// HTTP endpoints can be read but never written.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Http | Self::Https)
    }

    /// Bucket-addressed cloud object stores.
    pub fn is_object_store(&self) -> bool {
        matches!(self, Self::Gcs | Self::S3)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scheme {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" | "file" => Ok(Self::Local),
            "gs" | "gcs" => Ok(Self::Gcs),
            "s3" => Ok(Self::S3),
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(TypeError::UnknownScheme(other.to_string())),
        }
    }
}

/// Prefix accepted as an alias for `local://`.
const FILE_PREFIX: &str = "file://";

/// Identifier of one storage object: a scheme plus a normalized path.
///
/// Two URIs are equal iff their scheme, authority and normalized path are
/// equal. Equality says nothing about content.
///
/// | scheme | authority | path |
/// |---|---|---|
/// | local | empty | absolute, `.`/`..` resolved, no trailing `/` |
/// | gs, s3 | bucket | object key, no leading `/` |
/// | http(s) | host\[:port\] | `/path?query` |
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Uri {
    scheme: Scheme,
    authority: String,
    path: String,
}

impl Uri {
    /// Parse a URI string.
    ///
    /// Bare absolute paths and `file://` are accepted for the local scheme.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        if let Some(rest) = s.strip_prefix(Scheme::Local.prefix()) {
            return Self::local(rest).map_err(|reason| invalid(s, reason));
        }
        if let Some(rest) = s.strip_prefix(FILE_PREFIX) {
            return Self::local(rest).map_err(|reason| invalid(s, reason));
        }
        if s.starts_with('/') {
            return Self::local(s).map_err(|reason| invalid(s, reason));
        }
        for scheme in [Scheme::Gcs, Scheme::S3] {
            if let Some(rest) = s.strip_prefix(scheme.prefix()) {
                return Self::object(scheme, rest).map_err(|reason| invalid(s, reason));
            }
        }
        for scheme in [Scheme::Http, Scheme::Https] {
            if let Some(rest) = s.strip_prefix(scheme.prefix()) {
                return Self::http(scheme, rest).map_err(|reason| invalid(s, reason));
            }
        }
        Err(TypeError::UnknownScheme(s.to_string()))
    }

    /// Whether `s` starts with one of the known scheme prefixes.
    ///
    /// This is the candidate test used when scanning structured content:
    /// bare paths are deliberately not candidates there.
    pub fn has_known_prefix(s: &str) -> bool {
        s.starts_with(FILE_PREFIX) || Scheme::ALL.iter().any(|sc| s.starts_with(sc.prefix()))
    }

    /// A local URI from a filesystem path.
    pub fn from_local_path(path: impl Into<PathBuf>) -> Result<Self, TypeError> {
        let path: PathBuf = path.into();
        let display = path.to_string_lossy().into_owned();
        Self::local(&display).map_err(|reason| invalid(&display, reason))
    }

    fn local(path: &str) -> Result<Self, &'static str> {
        if !path.starts_with('/') {
            return Err("local path must be absolute");
        }
        Ok(Self {
            scheme: Scheme::Local,
            authority: String::new(),
            path: normalize_local(path),
        })
    }

    fn object(scheme: Scheme, rest: &str) -> Result<Self, &'static str> {
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err("missing bucket name");
        }
        let valid_bucket = bucket
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_' | b'.'));
        if !valid_bucket {
            return Err("invalid bucket name");
        }
        Ok(Self {
            scheme,
            authority: bucket.to_string(),
            path: key.trim_start_matches('/').to_string(),
        })
    }

    fn http(scheme: Scheme, rest: &str) -> Result<Self, &'static str> {
        let split = rest.find(['/', '?']).unwrap_or(rest.len());
        let (host, tail) = rest.split_at(split);
        if host.is_empty() {
            return Err("missing host");
        }
        let path = if tail.is_empty() {
            "/".to_string()
        } else if tail.starts_with('?') {
            format!("/{tail}")
        } else {
            tail.to_string()
        };
        Ok(Self {
            scheme,
            authority: host.to_ascii_lowercase(),
            path,
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Bucket for object stores, host for HTTP, empty for local.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Normalized path: absolute path, object key, or HTTP path with query.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn bucket(&self) -> Option<&str> {
        self.scheme.is_object_store().then_some(self.authority.as_str())
    }

    /// Filesystem path of a local URI.
    pub fn local_path(&self) -> Option<PathBuf> {
        (self.scheme == Scheme::Local).then(|| PathBuf::from(&self.path))
    }

    /// Path without the HTTP query string.
    fn path_without_query(&self) -> &str {
        match self.path.split_once('?') {
            Some((p, _)) => p,
            None => &self.path,
        }
    }

    /// Last path segment, without any query string.
    pub fn basename(&self) -> &str {
        let path = self.path_without_query();
        path.rsplit('/').next().unwrap_or(path)
    }

    /// File extension of the basename, without the dot.
    pub fn extension(&self) -> Option<&str> {
        let base = self.basename();
        match base.rfind('.') {
            Some(0) | None => None,
            Some(i) => Some(&base[i + 1..]),
        }
    }

    /// The path of this object relative to its storage root.
    ///
    /// `/data/a.txt` -> `data/a.txt`, `gs://bucket/x/a.txt` -> `x/a.txt`,
    /// `https://host/x/a.txt?sig=1` -> `host/x/a.txt`.
    pub fn relative_path(&self) -> String {
        match self.scheme {
            Scheme::Local => self.path.trim_start_matches('/').to_string(),
            Scheme::Gcs | Scheme::S3 => self.path.clone(),
            Scheme::Http | Scheme::Https => {
                let path = self.path_without_query().trim_start_matches('/');
                if path.is_empty() {
                    self.authority.clone()
                } else {
                    format!("{}/{}", self.authority, path)
                }
            }
        }
    }

    /// Treat `self` as a directory and append a relative path below it.
    pub fn join(&self, relative: &str) -> Self {
        let relative = relative.trim_start_matches('/');
        let path = match self.scheme {
            Scheme::Local => normalize_local(&format!("{}/{}", self.path, relative)),
            Scheme::Gcs | Scheme::S3 => {
                let base = self.path.trim_end_matches('/');
                if base.is_empty() {
                    relative.to_string()
                } else {
                    format!("{base}/{relative}")
                }
            }
            Scheme::Http | Scheme::Https => {
                format!("{}/{}", self.path_without_query().trim_end_matches('/'), relative)
            }
        };
        Self {
            scheme: self.scheme,
            authority: self.authority.clone(),
            path,
        }
    }

    /// [`Uri::join`] restricted to paths that stay below `self`.
    ///
    /// `.` and `..` segments are refused outright, and the joined result must
    /// still lie within `self`.
    pub fn join_within(&self, relative: &str) -> Result<Self, TypeError> {
        if relative.split('/').any(|segment| matches!(segment, "." | "..")) {
            return Err(invalid(
                &format!("{self}/{relative}"),
                "dot segments cannot be re-rooted",
            ));
        }
        let joined = self.join(relative);
        if !joined.is_within(self) {
            return Err(invalid(&joined.to_string(), "escapes the target directory"));
        }
        Ok(joined)
    }

    /// Whether `self` is `dir` itself or lies below it.
    pub fn is_within(&self, dir: &Uri) -> bool {
        if self.scheme != dir.scheme || self.authority != dir.authority {
            return false;
        }
        let base = dir.path_without_query().trim_end_matches('/');
        let path = self.path_without_query();
        if base.is_empty() {
            return true;
        }
        match path.strip_prefix(base) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Append `suffix` to the full path (`a.txt` -> `a.txt.lock`).
    pub fn with_suffix(&self, suffix: &str) -> Self {
        Self {
            scheme: self.scheme,
            authority: self.authority.clone(),
            path: format!("{}{}", self.path, suffix),
        }
    }

    /// Insert `tag` between the basename stem and its extension
    /// (`dir/j1.json` + `.gcs` -> `dir/j1.gcs.json`).
    pub fn with_stem_suffix(&self, tag: &str) -> Self {
        let base_len = self.basename().len();
        let dir_len = self.path_without_query().len() - base_len;
        let (dir, base) = self.path.split_at(dir_len);
        let base = base.split('?').next().unwrap_or(base);
        let renamed = match self.extension() {
            Some(ext) => {
                let stem = &base[..base.len() - ext.len() - 1];
                format!("{dir}{stem}{tag}.{ext}")
            }
            None => format!("{dir}{base}{tag}"),
        };
        Self {
            scheme: self.scheme,
            authority: self.authority.clone(),
            path: renamed,
        }
    }
}

fn invalid(uri: &str, reason: &str) -> TypeError {
    TypeError::InvalidUri {
        uri: uri.to_string(),
        reason: reason.to_string(),
    }
}

fn normalize_local(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scheme {
            Scheme::Local => write!(f, "{}{}", self.scheme.prefix(), self.path),
            Scheme::Gcs | Scheme::S3 => {
                write!(f, "{}{}/{}", self.scheme.prefix(), self.authority, self.path)
            }
            Scheme::Http | Scheme::Https => {
                write!(f, "{}{}{}", self.scheme.prefix(), self.authority, self.path)
            }
        }
    }
}

impl fmt::Debug for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uri({self})")
    }
}

impl FromStr for Uri {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Uri> for String {
    fn from(uri: Uri) -> Self {
        uri.to_string()
    }
}

impl TryFrom<String> for Uri {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}
