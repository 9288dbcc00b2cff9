//! Uploader configuration file.

use std::path::Path;
use std::time::Duration;

use chunkline_http::{HttpMode, HttpTransport};
use chunkline_transfer::TransferConfig;
use serde::{Deserialize, Serialize};

use crate::error::UploadError;

const DEFAULT_ENDPOINT: &str = "http://localhost:8080/upload";

/// Where and how files are uploaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploaderConfig {
    pub endpoint: String,
    pub mode: HttpMode,
    /// Per-request HTTP timeout in milliseconds; unset leaves only the
    /// per-attempt timeout of the transfer engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
    pub transfer: TransferConfig,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            mode: HttpMode::default(),
            request_timeout_ms: None,
            transfer: TransferConfig::default(),
        }
    }
}

impl UploaderConfig {
    /// Loads the config at `path`.
    ///
    /// A missing file yields defaults; an unparsable or invalid one is
    /// logged and also yields defaults.
    pub fn load(path: &Path) -> Result<Self, UploadError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<Self>(&content) {
            Ok(config) => match config.transfer.validate() {
                Ok(()) => Ok(config),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "invalid uploader config, using defaults"
                    );
                    Ok(Self::default())
                }
            },
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse uploader config, using defaults"
                );
                Ok(Self::default())
            }
        }
    }

    /// Writes the config as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), UploadError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Builds the HTTP transport this config describes.
    pub fn transport(&self) -> Result<HttpTransport, UploadError> {
        let transport = HttpTransport::new(self.endpoint.clone(), self.mode)?;
        Ok(match self.request_timeout_ms {
            Some(ms) => transport.with_request_timeout(Duration::from_millis(ms)),
            None => transport,
        })
    }
}
