use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stowage_backend::BackendConfig;
use stowage_lock::LockConfig;

use crate::error::ConfigError;

/// Engine settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LocalizeConfig {
    /// Target directory used when a call does not name one.
    pub target_dir: Option<String>,
    /// Move objects between two remote backends through a local temp dir
    /// when no backend can copy them directly.
    pub allow_local_staging: bool,
    /// Parent directory for staging; the system temp dir if unset.
    pub staging_dir: Option<PathBuf>,
    /// Lifetime of URLs produced when localizing onto an HTTP target.
    pub presign_duration_secs: u64,
    /// Local directories already served over HTTP, keyed by directory and
    /// mapped to the URL prefix that serves it. Lets local sources be
    /// localized onto an HTTP target without presigning.
    pub map_path_to_url: BTreeMap<String, String>,
}

impl Default for LocalizeConfig {
    fn default() -> Self {
        Self {
            target_dir: None,
            allow_local_staging: true,
            staging_dir: None,
            // 49 days
            presign_duration_secs: 4_233_600,
            map_path_to_url: BTreeMap::new(),
        }
    }
}

impl LocalizeConfig {
    pub fn presign_duration(&self) -> Duration {
        Duration::from_secs(self.presign_duration_secs)
    }

    /// URL serving the local file at `path`, from the longest matching
    /// directory in `map_path_to_url`.
    pub fn mapped_url(&self, path: &str) -> Option<String> {
        self.map_path_to_url
            .iter()
            .filter_map(|(dir, url)| {
                let dir = dir.trim_end_matches('/');
                let rest = path.strip_prefix(dir)?;
                let rest = rest.strip_prefix('/')?;
                Some((dir.len(), format!("{}/{}", url.trim_end_matches('/'), rest)))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, url)| url)
    }
}

/// Complete configuration, usually read from a TOML file:
///
/// ```toml
/// [lock]
/// ttl_secs = 1800
///
/// [localize]
/// target_dir = "s3://scratch/loc"
///
/// [backends.gcs]
/// use_gsutil_for_s3 = true
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StowageConfig {
    pub lock: LockConfig,
    pub localize: LocalizeConfig,
    pub backends: BackendConfig,
}

impl StowageConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}
