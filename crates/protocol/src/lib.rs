pub mod constants;
pub mod types;

// Re-export primary types for convenience.
pub use constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_PARALLEL_WORKERS, DEFAULT_MAX_RETRIES_PER_CHUNK,
    SMALL_CHUNK_SIZE,
};
pub use types::{ChunkHeader, FileMetadata, TransferProgress, TransferStatus};
