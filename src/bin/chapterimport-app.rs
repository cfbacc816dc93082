use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use chapterimport::app::build_orchestrator;
use chapterimport::app::server::{AppState, router};
use chapterimport::cli::ImportTuningArgs;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct AppArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    #[arg(long, env = "CHAPTERIMPORT_DATA_DIR", default_value = "workspace-catalog")]
    data_dir: PathBuf,

    #[command(flatten)]
    tuning: ImportTuningArgs,

    /// Progress events buffered per client.
    #[arg(long, default_value_t = 64)]
    progress_buffer: usize,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    chapterimport::logging::init("info,tower_http=debug")?;

    let args = AppArgs::parse();
    tracing::info!(?args, "starting chapterimport-app");

    let orchestrator = build_orchestrator(&args.data_dir, args.tuning.settings())?;
    tracing::info!(settings = ?orchestrator.settings(), "import settings");
    let shutdown = CancellationToken::new();
    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        progress_buffer: args.progress_buffer.max(1),
        shutdown: shutdown.clone(),
    };

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("bind {}", args.addr))?;
    tracing::info!(addr = %args.addr, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested; cancelling running imports");
            }
            shutdown.cancel();
        })
        .await
        .context("serve")?;

    Ok(())
}
