use std::time::Duration;

use chunkline_protocol::{ChunkHeader, FileMetadata};
use serde::Serialize;
use tracing::debug;

use crate::BoxFuture;
use crate::planner::ChunkDescriptor;

/// Errors from a single chunk send.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("request timed out")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

/// Session-wide context passed with every chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub session_id: String,
    pub file: FileMetadata,
    pub total_chunks: u32,
    pub chunk_size: u64,
}

impl SessionMetadata {
    /// Builds the wire header identifying `chunk` within this session.
    pub fn header_for(&self, chunk: &ChunkDescriptor) -> ChunkHeader {
        ChunkHeader {
            session_id: self.session_id.clone(),
            chunk_index: chunk.index,
            total_chunks: self.total_chunks,
            file_name: self.file.name.clone(),
            offset: chunk.start_offset,
            length: chunk.length,
        }
    }
}

/// The wire call that delivers one chunk to the remote endpoint.
///
/// Implemented by the HTTP transport and by test fakes; keeping it a
/// trait leaves the engine free of any network dependency.
pub trait ChunkTransport: Send + Sync {
    /// Sends the bytes of `chunk`. Any error makes the attempt retryable.
    fn send<'a>(
        &'a self,
        data: Vec<u8>,
        chunk: &'a ChunkDescriptor,
        session: &'a SessionMetadata,
    ) -> BoxFuture<'a, Result<(), TransportError>>;
}

/// Transport that waits a fixed delay and always succeeds.
///
/// Useful for demos and for wiring up a UI before a server exists.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    delay: Duration,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl SimulatedTransport {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl ChunkTransport for SimulatedTransport {
    fn send<'a>(
        &'a self,
        data: Vec<u8>,
        chunk: &'a ChunkDescriptor,
        session: &'a SessionMetadata,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            debug!(
                session = %session.session_id,
                chunk = chunk.index,
                bytes = data.len(),
                "simulated chunk upload"
            );
            Ok(())
        })
    }
}
