//! Data types for the upload flow.

use std::path::PathBuf;

use chunkline_protocol::TransferProgress;

/// Event emitted while uploading files.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// Progress snapshot for the file currently uploading.
    Progress {
        file: String,
        progress: TransferProgress,
    },
    /// Every chunk of the file was accepted.
    Completed { file: String, session_id: String },
    /// The file could not be uploaded.
    Failed { file: String, error: String },
    /// The upload was cancelled before it finished.
    Cancelled { file: String },
}

/// Result of uploading a single file.
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub path: PathBuf,
    /// Transfer session id; `None` if the session never started.
    pub session_id: Option<String>,
    pub success: bool,
    pub cancelled: bool,
    /// Indices of chunks that exhausted their retries.
    pub failed_chunks: Vec<u32>,
    pub error: Option<String>,
}

impl UploadResult {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            session_id: None,
            success: false,
            cancelled: false,
            failed_chunks: Vec::new(),
            error: None,
        }
    }
}
