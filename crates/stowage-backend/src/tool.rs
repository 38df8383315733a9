use std::process::Stdio;

use stowage_types::{Scheme, Uri};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{BackendError, BackendResult};

/// External command-line copier for scheme pairs no client library bridges,
/// such as `gsutil` between `gs://` and `s3://`.
#[derive(Clone, Debug)]
pub struct TransferTool {
    program: String,
    schemes: Vec<Scheme>,
}

impl TransferTool {
    pub fn new(program: impl Into<String>, schemes: Vec<Scheme>) -> Self {
        Self {
            program: program.into(),
            schemes,
        }
    }

    /// `gsutil`, which reads AWS credentials from its boto configuration.
    pub fn gsutil(program: impl Into<String>) -> Self {
        Self::new(program, vec![Scheme::Gcs, Scheme::S3])
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether this tool can copy between the two URIs.
    pub fn bridges(&self, source: &Uri, destination: &Uri) -> bool {
        self.schemes.contains(&source.scheme()) && self.schemes.contains(&destination.scheme())
    }

    /// Run `<program> -q cp <source> <destination>`.
    pub async fn copy(&self, source: &Uri, destination: &Uri) -> BackendResult<()> {
        debug!(program = %self.program, %source, %destination, "external copy");
        let output = Command::new(&self.program)
            .arg("-q")
            .arg("cp")
            .arg(source.to_string())
            .arg(destination.to_string())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| BackendError::Tool {
                program: self.program.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(program = %self.program, status = %output.status, "external copy failed");
            return Err(BackendError::Tool {
                program: self.program.clone(),
                message: if stderr.is_empty() {
                    output.status.to_string()
                } else {
                    stderr
                },
            });
        }
        Ok(())
    }
}
