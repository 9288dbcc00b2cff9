//! File metadata derived from the local filesystem.

use std::path::Path;

use chunkline_protocol::FileMetadata;
use chunkline_protocol::constants::OCTET_STREAM;

use crate::error::UploadError;

/// Builds upload metadata for the regular file at `path`.
///
/// The name is the last path component; the MIME type comes from the
/// extension.
pub fn metadata_for_path(path: &Path) -> Result<FileMetadata, UploadError> {
    let meta = std::fs::metadata(path)?;
    if !meta.is_file() {
        return Err(UploadError::NotAFile(path.display().to_string()));
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mime = detect_mime_type(&name).unwrap_or(OCTET_STREAM);

    Ok(FileMetadata::new(name, meta.len()).with_mime_type(mime))
}

/// Detects the MIME type from a file name extension.
pub fn detect_mime_type(name: &str) -> Option<&'static str> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("mp3") => Some("audio/mpeg"),
        Some("mp4") => Some("video/mp4"),
        Some("pdf") => Some("application/pdf"),
        Some("doc") => Some("application/msword"),
        Some("docx") => {
            Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document")
        }
        Some("xls") => Some("application/vnd.ms-excel"),
        Some("xlsx") => Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        Some("jpg" | "jpeg") => Some("image/jpeg"),
        Some("png") => Some("image/png"),
        Some("gif") => Some("image/gif"),
        _ => None,
    }
}

/// Formats a byte count for display ("0 B", "1.5 KB", "12.34 MB").
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 B".into();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let formatted = format!("{value:.2}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[unit])
}
