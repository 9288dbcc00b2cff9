use std::time::Duration;

/// Default chunk size: 5 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Smaller chunk size (1 MiB) for slow or metered links.
pub const SMALL_CHUNK_SIZE: u64 = 1024 * 1024;

/// Default number of chunks uploaded concurrently.
pub const DEFAULT_MAX_PARALLEL_WORKERS: usize = 3;

/// Default number of re-attempts per chunk after the first failure.
pub const DEFAULT_MAX_RETRIES_PER_CHUNK: u32 = 3;

/// Default upper bound for a single chunk attempt (read + send).
///
/// Chunk uploads may take significantly longer than control requests
/// due to disk I/O and network conditions.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Fallback MIME type for unrecognised files.
pub const OCTET_STREAM: &str = "application/octet-stream";

// ---------------------------------------------------------------------------
// HTTP header convention (raw-body PUT)
// ---------------------------------------------------------------------------

/// Zero-based position of the chunk within the plan.
pub const HEADER_CHUNK_INDEX: &str = "X-Chunk-Index";

/// Number of chunks in the plan.
pub const HEADER_TOTAL_CHUNKS: &str = "X-Total-Chunks";

/// Byte offset of the chunk within the source.
pub const HEADER_CHUNK_OFFSET: &str = "X-Chunk-Offset";

/// Byte length of the chunk.
pub const HEADER_CHUNK_LENGTH: &str = "X-Chunk-Length";

/// Target file name on the remote side.
pub const HEADER_FILE_NAME: &str = "X-File-Name";

/// Session identifier, so the server can group chunks of one transfer.
pub const HEADER_SESSION_ID: &str = "X-Session-Id";

// ---------------------------------------------------------------------------
// Multipart form convention (POST)
// ---------------------------------------------------------------------------

/// Form part carrying the chunk bytes.
pub const FIELD_CHUNK: &str = "chunk";

/// Form field with the chunk index.
pub const FIELD_CHUNK_INDEX: &str = "chunkIndex";

/// Form field with the total chunk count.
pub const FIELD_TOTAL_CHUNKS: &str = "totalChunks";

/// Form field with the chunk's byte offset.
pub const FIELD_CHUNK_OFFSET: &str = "chunkOffset";

/// Form field with the chunk's byte length.
pub const FIELD_CHUNK_LENGTH: &str = "chunkLength";

/// Form field with the target file name.
pub const FIELD_FILE_NAME: &str = "fileName";
