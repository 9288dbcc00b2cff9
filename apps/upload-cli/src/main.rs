use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chunkline_http::HttpMode;
use chunkline_transfer::{ChunkTransport, SimulatedTransport};
use chunkline_uploader::{
    UploadEvent, UploadOrchestrator, UploaderConfig, format_file_size, metadata_for_path,
};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Uploader config file (JSON)
    #[clap(short, long, default_value = "chunkline.json")]
    config: PathBuf,

    /// Endpoint overriding the configured one
    #[clap(short, long)]
    endpoint: Option<String>,

    /// Send chunks as multipart form posts instead of raw PUTs
    #[clap(long)]
    multipart: bool,

    /// Pretend to upload, waiting this many milliseconds per chunk
    #[clap(long)]
    simulate_ms: Option<u64>,

    /// Files to upload, in order
    #[clap(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chunkline=debug")),
        )
        .init();

    let args = Args::parse();

    let mut config = UploaderConfig::load(&args.config)?;
    if let Some(endpoint) = args.endpoint {
        config.endpoint = endpoint;
    }
    if args.multipart {
        config.mode = HttpMode::Multipart;
    }

    let transport: Arc<dyn ChunkTransport> = match args.simulate_ms {
        Some(ms) => Arc::new(SimulatedTransport::new(Duration::from_millis(ms))),
        None => Arc::new(config.transport()?),
    };

    for path in &args.files {
        if let Ok(meta) = metadata_for_path(path) {
            info!(
                file = %meta.name,
                size = %format_file_size(meta.size),
                mime = %meta.mime_type,
                "queued"
            );
        }
    }

    let mut orch = UploadOrchestrator::new(config.transfer.clone());
    let mut events = orch
        .take_events()
        .ok_or_else(|| anyhow::anyhow!("event receiver already taken"))?;

    let cancel = orch.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight chunks");
            cancel.cancel();
        }
    });

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                UploadEvent::Progress { file, progress } => info!(
                    file = %file,
                    percent = %format!("{:.1}", progress.percentage()),
                    sent = %format_file_size(progress.transferred_bytes),
                    total = %format_file_size(progress.total_bytes),
                    "progress"
                ),
                UploadEvent::Completed { file, session_id } => {
                    info!(file = %file, session = %session_id, "done")
                }
                UploadEvent::Failed { file, error } => warn!(file = %file, error = %error, "failed"),
                UploadEvent::Cancelled { file } => warn!(file = %file, "cancelled"),
            }
        }
    });

    let results = orch.upload_files(&args.files, transport).await;
    drop(orch);
    let _ = printer.await;

    let failed = results.iter().filter(|r| !r.success).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} file(s) not uploaded", results.len());
    }
    Ok(())
}
