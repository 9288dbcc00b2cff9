use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chunkline_protocol::{FileMetadata, TransferProgress, TransferStatus};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::TransferConfig;
use crate::planner::{ChunkDescriptor, plan};
use crate::pool::{Shared, WorkerPool};
use crate::retry::RetryCoordinator;
use crate::source::SourceAccessor;
use crate::state::{ChunkState, FailedChunk, SessionState};
use crate::transport::{ChunkTransport, SessionMetadata};
use crate::TransferError;

/// Final result of [`TransferSession::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Every chunk reached the remote side.
    Success,
    /// At least one chunk exhausted its retries; all others were settled.
    Failure(Vec<FailedChunk>),
    /// The caller cancelled before every chunk was settled.
    Cancelled,
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    fn status(&self) -> TransferStatus {
        match self {
            Self::Success => TransferStatus::Completed,
            Self::Failure(_) => TransferStatus::Failed,
            Self::Cancelled => TransferStatus::Cancelled,
        }
    }
}

/// Opt-in per-chunk notifications.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    ChunkStarted {
        index: u32,
        attempt: u32,
    },
    ChunkCompleted {
        index: u32,
        attempts: u32,
    },
    ChunkRetrying {
        index: u32,
        attempts: u32,
        delay: Duration,
        error: String,
    },
    ChunkAbandoned {
        index: u32,
        attempts: u32,
        error: String,
    },
    Progress(TransferProgress),
}

/// One source uploaded as a set of independently retried chunks.
///
/// The session owns the chunk sets; [`progress`](Self::progress) and
/// [`cancel`](Self::cancel) may be called from other tasks while
/// [`start`](Self::start) is running.
pub struct TransferSession {
    shared: Arc<Shared>,
    source: Arc<dyn SourceAccessor>,
    transport: Arc<dyn ChunkTransport>,
    retry: RetryCoordinator,
    attempt_timeout: Option<Duration>,
    max_workers: usize,
    events: Option<mpsc::Sender<TransferEvent>>,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl TransferSession {
    /// Validates `config` and plans the chunks of `source`.
    ///
    /// `file.size` is overwritten with the source length so progress
    /// always reflects what is actually read.
    pub fn new(
        source: Arc<dyn SourceAccessor>,
        transport: Arc<dyn ChunkTransport>,
        config: TransferConfig,
        mut file: FileMetadata,
    ) -> Result<Self, TransferError> {
        config.validate()?;

        let total_size = source.size();
        let chunks = plan(total_size, config.chunk_size_bytes)?;
        file.size = total_size;

        let metadata = SessionMetadata {
            session_id: uuid::Uuid::new_v4().to_string(),
            file,
            total_chunks: chunks.len() as u32,
            chunk_size: config.chunk_size_bytes,
        };
        let state = SessionState::new(chunks, config.max_parallel_workers);

        Ok(Self {
            shared: Arc::new(Shared::new(state, metadata)),
            source,
            transport,
            retry: RetryCoordinator::from_config(&config),
            attempt_timeout: config.attempt_timeout,
            max_workers: config.max_parallel_workers,
            events: None,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Streams per-chunk events to `tx`. Events are dropped when the
    /// channel is full rather than stalling the workers.
    pub fn with_events(mut self, tx: mpsc::Sender<TransferEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Replaces the session's cancellation token, e.g. with a child of a
    /// caller-owned token.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Uploads every chunk and resolves once all of them are settled.
    ///
    /// Per-chunk failures never end the session early: other chunks keep
    /// going, and the outcome is aggregated once the queue drains.
    pub async fn start(&self) -> Result<TransferOutcome, TransferError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransferError::AlreadyStarted);
        }

        let session = self.id().to_string();
        let total_chunks = self.shared.metadata.total_chunks;

        if total_chunks == 0 {
            info!(%session, "empty source, nothing to transfer");
            return Ok(self.finish(TransferOutcome::Success));
        }
        if self.cancel.is_cancelled() {
            return Ok(self.finish(TransferOutcome::Cancelled));
        }

        let workers = self.max_workers.min(total_chunks as usize);
        info!(
            %session,
            file = %self.shared.metadata.file.name,
            bytes = self.shared.metadata.file.size,
            chunks = total_chunks,
            workers,
            "transfer started"
        );
        self.shared.set_status(TransferStatus::InProgress);

        let pool = Arc::new(WorkerPool {
            shared: Arc::clone(&self.shared),
            source: Arc::clone(&self.source),
            transport: Arc::clone(&self.transport),
            retry: self.retry.clone(),
            attempt_timeout: self.attempt_timeout,
            events: self.events.clone(),
            cancel: self.cancel.clone(),
        });
        pool.run(workers).await;

        let outcome = {
            let mut state = self.shared.state.lock().unwrap();
            if !state.is_drained() && self.cancel.is_cancelled() {
                TransferOutcome::Cancelled
            } else {
                if !state.is_drained() {
                    let stranded = state.fail_pending("no worker left to upload chunk");
                    error!(%session, chunks = stranded, "workers exited with chunks still pending");
                }
                let failed = state.failed();
                if failed.is_empty() {
                    TransferOutcome::Success
                } else {
                    TransferOutcome::Failure(failed)
                }
            }
        };

        match &outcome {
            TransferOutcome::Success => info!(%session, "transfer completed"),
            TransferOutcome::Failure(failed) => {
                warn!(%session, failed = failed.len(), "transfer failed")
            }
            TransferOutcome::Cancelled => info!(%session, "transfer cancelled"),
        }
        Ok(self.finish(outcome))
    }

    fn finish(&self, outcome: TransferOutcome) -> TransferOutcome {
        self.shared.set_status(outcome.status());
        if let Some(tx) = &self.events {
            let _ = tx.try_send(TransferEvent::Progress(self.shared.progress()));
        }
        outcome
    }

    /// Snapshot of the current progress.
    pub fn progress(&self) -> TransferProgress {
        self.shared.progress()
    }

    /// Estimated time to finish at the recent transfer rate.
    pub fn eta(&self) -> Option<Duration> {
        let p = self.progress();
        self.shared
            .meter
            .eta(p.total_bytes.saturating_sub(p.transferred_bytes))
    }

    /// Stops new assignments; in-flight attempts run to completion.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this session when triggered.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn id(&self) -> &str {
        &self.shared.metadata.session_id
    }

    pub fn metadata(&self) -> &SessionMetadata {
        &self.shared.metadata
    }

    /// Current descriptors, including attempt counts.
    pub fn descriptors(&self) -> Vec<ChunkDescriptor> {
        self.shared.state.lock().unwrap().descriptors().to_vec()
    }

    /// Current state of every chunk, by index.
    pub fn chunk_states(&self) -> Vec<ChunkState> {
        self.shared.state.lock().unwrap().chunk_states().to_vec()
    }
}
