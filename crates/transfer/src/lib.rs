//! Chunked transfer engine with bounded parallelism and per-chunk retry.
//!
//! A source of known length is split into fixed-size chunks by the
//! [`planner`], a pool of workers uploads them through a
//! [`ChunkTransport`], failed chunks go back to the queue until their
//! retry budget is spent, and the [`TransferSession`] reports the
//! aggregate outcome.

mod config;
mod planner;
mod pool;
mod progress;
mod retry;
mod session;
mod source;
mod state;
mod transport;

#[cfg(test)]
mod testing;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub use config::{BackoffConfig, TransferConfig};
pub use planner::{ChunkDescriptor, chunk_count, plan};
pub use progress::ThroughputMeter;
pub use retry::{RetryCoordinator, RetryDecision};
pub use session::{TransferEvent, TransferOutcome, TransferSession};
pub use source::{FileSource, MemorySource, SourceAccessor, SourceError};
pub use state::{ChunkState, FailedChunk};
pub use transport::{ChunkTransport, SessionMetadata, SimulatedTransport, TransportError};

/// Boxed, sendable future returned by the collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors produced by the transfer crate.
///
/// Only setup problems surface here; per-chunk failures are absorbed by
/// the retry coordinator and reported through [`TransferOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("session already started")]
    AlreadyStarted,

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a single chunk attempt failed. Always retryable.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),
}
