use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use tokio_stream::Stream;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::import::ImportOrchestrator;
use crate::import::progress::ProgressEmitter;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ImportOrchestrator>,
    /// Events buffered per client before the aggregator waits on it.
    pub progress_buffer: usize,
    /// Parent of every run's cancellation token.
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/chapters/:novel_id/scrape", get(import_chapters))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /chapters/:novel_id/scrape
///
/// Streams `status` events while the import runs and ends with exactly one
/// `complete` or `error` event. Closing the connection cancels the run.
async fn import_chapters(
    State(state): State<AppState>,
    Path(novel_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (emitter, rx) = ProgressEmitter::channel(state.progress_buffer);
    let orchestrator = Arc::clone(&state.orchestrator);
    let cancel = state.shutdown.child_token();

    tracing::info!(%novel_id, "import stream opened");
    tokio::spawn(async move {
        let report = orchestrator.run_for_novel(&novel_id, emitter, cancel).await;
        tracing::info!(
            %novel_id,
            outcome = ?report.outcome,
            persisted = report.persisted,
            "import stream finished"
        );
    });

    let stream = ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(event.to_sse_event()));
    Sse::new(stream).keep_alive(KeepAlive::default())
}
