//! Upload orchestrator.
//!
//! Runs one transfer session per file, forwards session progress as
//! [`UploadEvent`]s, and supports cancellation across files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chunkline_transfer::{
    ChunkTransport, FileSource, TransferConfig, TransferError, TransferEvent, TransferOutcome,
    TransferSession,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::UploadError;
use crate::metadata::metadata_for_path;
use crate::types::{UploadEvent, UploadResult};

/// Uploads files one session at a time.
pub struct UploadOrchestrator {
    config: TransferConfig,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
    cancel: CancellationToken,
}

impl Default for UploadOrchestrator {
    fn default() -> Self {
        Self::new(TransferConfig::default())
    }
}

impl UploadOrchestrator {
    /// Creates a new orchestrator.
    pub fn new(config: TransferConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            config,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Returns a token that cancels the current and all remaining uploads.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Uploads several files in order. A failed file does not stop the
    /// others; after cancellation the remaining files report cancelled.
    pub async fn upload_files(
        &self,
        paths: &[PathBuf],
        transport: Arc<dyn ChunkTransport>,
    ) -> Vec<UploadResult> {
        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            results.push(self.upload_file(path, Arc::clone(&transport)).await);
        }
        results
    }

    /// Uploads one file and reports how it ended.
    pub async fn upload_file(
        &self,
        path: &Path,
        transport: Arc<dyn ChunkTransport>,
    ) -> UploadResult {
        let file = display_name(path);
        let mut result = UploadResult::new(path.to_path_buf());

        match self.upload_single(path, &file, transport).await {
            Ok((session_id, outcome)) => {
                result.session_id = Some(session_id.clone());
                match outcome {
                    TransferOutcome::Success => {
                        info!(file = %file, session = %session_id, "upload completed");
                        result.success = true;
                        self.emit(UploadEvent::Completed { file, session_id });
                    }
                    TransferOutcome::Failure(failed) => {
                        let err_msg = format!("{} chunk(s) failed", failed.len());
                        error!(file = %file, session = %session_id, error = %err_msg, "upload failed");
                        result.failed_chunks = failed.iter().map(|c| c.descriptor.index).collect();
                        result.error = Some(err_msg.clone());
                        self.emit(UploadEvent::Failed {
                            file,
                            error: err_msg,
                        });
                    }
                    TransferOutcome::Cancelled => {
                        self.mark_cancelled(&mut result, file);
                    }
                }
            }
            Err(UploadError::Cancelled) => self.mark_cancelled(&mut result, file),
            Err(e) => {
                let err_msg = e.to_string();
                error!(file = %file, error = %err_msg, "upload failed");
                result.error = Some(err_msg.clone());
                self.emit(UploadEvent::Failed {
                    file,
                    error: err_msg,
                });
            }
        }

        result
    }

    async fn upload_single(
        &self,
        path: &Path,
        file: &str,
        transport: Arc<dyn ChunkTransport>,
    ) -> Result<(String, TransferOutcome), UploadError> {
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let metadata = metadata_for_path(path)?;
        let source = FileSource::open(path).map_err(TransferError::from)?;

        let (tx, mut rx) = mpsc::channel(64);
        let session = TransferSession::new(Arc::new(source), transport, self.config.clone(), metadata)?
            .with_events(tx)
            .with_cancel_token(self.cancel.child_token());
        let session_id = session.id().to_string();

        let forward = {
            let events_tx = self.events_tx.clone();
            let file = file.to_string();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if let TransferEvent::Progress(progress) = event {
                        let _ = events_tx.try_send(UploadEvent::Progress {
                            file: file.clone(),
                            progress,
                        });
                    }
                }
            })
        };

        let outcome = session.start().await;
        // Dropping the session closes the event channel and ends the forwarder.
        drop(session);
        if let Err(e) = forward.await {
            warn!(file = %file, error = %e, "progress forwarder aborted");
        }

        Ok((session_id, outcome?))
    }

    fn mark_cancelled(&self, result: &mut UploadResult, file: String) {
        info!(file = %file, "upload cancelled");
        result.cancelled = true;
        result.error = Some(UploadError::Cancelled.to_string());
        self.emit(UploadEvent::Cancelled { file });
    }

    fn emit(&self, event: UploadEvent) {
        let _ = self.events_tx.try_send(event);
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
