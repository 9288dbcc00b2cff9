//! File upload flow on top of the chunked transfer engine.
//!
//! Derives [`FileMetadata`](chunkline_protocol::FileMetadata) from local
//! files, loads the uploader config, and runs one transfer session per
//! file through any [`ChunkTransport`](chunkline_transfer::ChunkTransport),
//! typically the HTTP transport built by [`UploaderConfig::transport`].

pub mod config;
pub mod error;
pub mod metadata;
pub mod types;
pub mod upload;

pub use config::UploaderConfig;
pub use error::UploadError;
pub use metadata::{detect_mime_type, format_file_size, metadata_for_path};
pub use types::{UploadEvent, UploadResult};
pub use upload::UploadOrchestrator;
