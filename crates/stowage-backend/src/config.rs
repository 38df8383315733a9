use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Per-scheme backend settings. Credentials not given here are taken from
/// the standard environment of each vendor SDK.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    pub gcs: GcsConfig,
    pub s3: S3Config,
    pub http: HttpConfig,
}

/// Google Cloud Storage settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GcsConfig {
    /// Service account JSON key; also enables URL signing.
    pub service_account_key: Option<PathBuf>,
    /// Copy between `s3://` and `gs://` with `gsutil` instead of staging locally.
    pub use_gsutil_for_s3: bool,
    pub gsutil_path: String,
}

impl Default for GcsConfig {
    fn default() -> Self {
        Self {
            service_account_key: None,
            use_gsutil_for_s3: false,
            gsutil_path: "gsutil".to_string(),
        }
    }
}

/// Amazon S3 settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct S3Config {
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores.
    pub endpoint: Option<String>,
    pub allow_http: bool,
}

/// Read-only HTTP(S) settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("stowage/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 60,
        }
    }
}
