//! Bounded worker pool draining the pending queue.
//!
//! Workers never touch the chunk sets directly: every transition happens
//! inside `SessionState` under `Shared::state`, and each transition bumps
//! a `watch` generation counter so idle workers re-check the queue.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chunkline_protocol::{TransferProgress, TransferStatus};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::ChunkError;
use crate::planner::ChunkDescriptor;
use crate::progress::ThroughputMeter;
use crate::retry::{RetryCoordinator, RetryDecision};
use crate::session::TransferEvent;
use crate::source::SourceAccessor;
use crate::state::{Next, SessionState};
use crate::transport::{ChunkTransport, SessionMetadata};

/// State shared between the session handle and its workers.
pub(crate) struct Shared {
    pub state: Mutex<SessionState>,
    pub changed: watch::Sender<u64>,
    pub meter: ThroughputMeter,
    pub metadata: SessionMetadata,
}

impl Shared {
    pub fn new(state: SessionState, metadata: SessionMetadata) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            state: Mutex::new(state),
            changed,
            meter: ThroughputMeter::default(),
            metadata,
        }
    }

    /// Wakes workers waiting for a state change.
    pub fn notify(&self) {
        self.changed.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    pub fn set_status(&self, status: TransferStatus) {
        self.state.lock().unwrap().status = status;
    }

    pub fn progress(&self) -> TransferProgress {
        let (counts, total_chunks, status) = {
            let s = self.state.lock().unwrap();
            (s.counts(), s.total_chunks(), s.status)
        };
        TransferProgress {
            session_id: self.metadata.session_id.clone(),
            status,
            total_chunks,
            completed_chunks: counts.completed,
            failed_chunks: counts.failed,
            in_flight_chunks: counts.in_flight,
            total_bytes: self.metadata.file.size,
            transferred_bytes: counts.transferred_bytes,
            bytes_per_second: self.meter.bytes_per_second(),
        }
    }
}

/// Everything a worker needs to process chunks.
pub(crate) struct WorkerPool {
    pub shared: Arc<Shared>,
    pub source: Arc<dyn SourceAccessor>,
    pub transport: Arc<dyn ChunkTransport>,
    pub retry: RetryCoordinator,
    pub attempt_timeout: Option<Duration>,
    pub events: Option<mpsc::Sender<TransferEvent>>,
    pub cancel: CancellationToken,
}

impl WorkerPool {
    /// Runs `workers` workers until the queue drains or cancellation
    /// stops new assignments and in-flight attempts settle.
    pub async fn run(self: Arc<Self>, workers: usize) {
        let mut set = JoinSet::new();
        for worker in 0..workers {
            set.spawn(Arc::clone(&self).worker_loop(worker));
        }
        let mut next_worker = workers;
        while let Some(res) = set.join_next().await {
            let Err(e) = res else { continue };
            error!(session = %self.shared.metadata.session_id, error = %e, "transfer worker aborted");
            // The guard has already abandoned the panicked worker's chunk.
            if e.is_panic() && !self.cancel.is_cancelled() {
                debug!(worker = next_worker, "spawning replacement worker");
                set.spawn(Arc::clone(&self).worker_loop(next_worker));
                next_worker += 1;
            }
        }
    }

    async fn worker_loop(self: Arc<Self>, worker: usize) {
        let mut changed = self.shared.changed.subscribe();
        loop {
            // Mark the current generation seen before inspecting state so a
            // transition racing with this check still wakes us below.
            changed.borrow_and_update();
            if self.cancel.is_cancelled() {
                debug!(worker, "worker stopping: cancelled");
                break;
            }

            let next = self.shared.state.lock().unwrap().take_next(Instant::now());
            match next {
                Next::Assigned(chunk) => {
                    self.shared.notify();
                    self.process(chunk, worker).await;
                }
                Next::Wait(deadline) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => {}
                        res = changed.changed() => {
                            if res.is_err() {
                                break;
                            }
                        }
                        _ = sleep_until(deadline) => {}
                    }
                }
                Next::Drained => {
                    debug!(worker, "worker stopping: queue drained");
                    break;
                }
            }
        }
    }

    async fn process(&self, chunk: ChunkDescriptor, worker: usize) {
        let session = &self.shared.metadata.session_id;
        let attempt = chunk.attempt_count + 1;
        let mut guard = InFlightGuard::new(&self.shared, chunk.index);

        debug!(%session, chunk = chunk.index, attempt, worker, "uploading chunk");
        self.emit(TransferEvent::ChunkStarted {
            index: chunk.index,
            attempt,
        });

        match self.attempt(&chunk).await {
            Ok(()) => {
                let done = self.shared.state.lock().unwrap().complete(chunk.index);
                guard.settle();
                self.shared.meter.record(done.length);
                self.shared.notify();

                debug!(%session, chunk = done.index, attempts = done.attempt_count, "chunk uploaded");
                self.emit(TransferEvent::ChunkCompleted {
                    index: done.index,
                    attempts: done.attempt_count,
                });
            }
            Err(err) => {
                let message = err.to_string();
                let decision = {
                    let mut state = self.shared.state.lock().unwrap();
                    self.retry
                        .on_failure(&mut state, chunk.index, message.clone(), Instant::now())
                };
                guard.settle();
                self.shared.notify();

                match decision {
                    RetryDecision::Retry { attempts, delay } => {
                        warn!(
                            %session,
                            chunk = chunk.index,
                            attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %message,
                            "chunk failed, retrying"
                        );
                        self.emit(TransferEvent::ChunkRetrying {
                            index: chunk.index,
                            attempts,
                            delay,
                            error: message,
                        });
                    }
                    RetryDecision::Abandon { attempts } => {
                        warn!(
                            %session,
                            chunk = chunk.index,
                            attempts,
                            error = %message,
                            "chunk retries exhausted"
                        );
                        self.emit(TransferEvent::ChunkAbandoned {
                            index: chunk.index,
                            attempts,
                            error: message,
                        });
                    }
                }
            }
        }

        self.emit(TransferEvent::Progress(self.shared.progress()));
    }

    /// One attempt: read the range, then send it, bounded by the timeout.
    async fn attempt(&self, chunk: &ChunkDescriptor) -> Result<(), ChunkError> {
        let work = async {
            let data = self
                .source
                .read_range(chunk.start_offset, chunk.length)
                .await?;
            self.transport
                .send(data, chunk, &self.shared.metadata)
                .await?;
            Ok(())
        };
        match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| ChunkError::TimedOut(limit))?,
            None => work.await,
        }
    }

    fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.events {
            // Never block a worker on a slow consumer.
            let _ = tx.try_send(event);
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Abandons an in-flight chunk if its worker unwinds before settling it,
/// so a panicking transport cannot leave the session waiting forever.
struct InFlightGuard<'a> {
    shared: &'a Shared,
    index: u32,
    settled: bool,
}

impl<'a> InFlightGuard<'a> {
    fn new(shared: &'a Shared, index: u32) -> Self {
        Self {
            shared,
            index,
            settled: false,
        }
    }

    fn settle(&mut self) {
        self.settled = true;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Ok(mut state) = self.shared.state.lock()
            && state.is_in_flight(self.index)
        {
            state.record_failure(self.index);
            state.abandon(self.index, "worker aborted".into());
        }
        self.shared.notify();
    }
}
