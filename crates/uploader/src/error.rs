//! Upload error types.

/// Errors produced while uploading a file.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not a regular file: {0}")]
    NotAFile(String),

    #[error("cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] chunkline_http::HttpError),

    #[error("transfer error: {0}")]
    Transfer(#[from] chunkline_transfer::TransferError),
}
