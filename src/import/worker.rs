use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::import::{FailureReason, ImportOutcome};
use crate::model::NovelId;
use crate::source::{ChapterSource, FetchError};
use crate::store::DedupOracle;

/// Everything a pool worker needs. Cloned once per worker.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub(crate) novel_id: NovelId,
    pub(crate) oracle: Arc<dyn DedupOracle>,
    pub(crate) source: Arc<dyn ChapterSource>,
    pub(crate) queue: Arc<Mutex<mpsc::Receiver<u32>>>,
    pub(crate) outcomes: mpsc::Sender<ImportOutcome>,
    pub(crate) ceiling: watch::Receiver<u32>,
    pub(crate) cancel: CancellationToken,
}

pub(crate) async fn run_worker(worker_id: usize, ctx: WorkerContext) {
    let mut processed = 0usize;
    loop {
        let next = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            next = async {
                // Hold the lock only while waiting for one item.
                let mut queue = ctx.queue.lock().await;
                queue.recv().await
            } => next,
        };
        let Some(chapter_number) = next else {
            break;
        };

        let Some(outcome) = process(&ctx, chapter_number).await else {
            tracing::debug!(worker_id, chapter_number, "fetch cancelled");
            break;
        };
        if ctx.outcomes.send(outcome).await.is_err() {
            break;
        }
        processed += 1;
    }
    tracing::debug!(worker_id, processed, "import worker finished");
}

/// Produces the outcome for one chapter, or `None` if the run was cancelled
/// while the chapter was being fetched.
async fn process(ctx: &WorkerContext, chapter_number: u32) -> Option<ImportOutcome> {
    if chapter_number > *ctx.ceiling.borrow() {
        return Some(ImportOutcome::Unavailable { chapter_number });
    }

    match ctx.oracle.exists(chapter_number, &ctx.novel_id).await {
        Ok(true) => return Some(ImportOutcome::Skipped { chapter_number }),
        Ok(false) => {}
        Err(err) => {
            return Some(ImportOutcome::Failed {
                chapter_number,
                reason: FailureReason::Lookup(format!("{err:#}")),
            });
        }
    }

    let fetched = tokio::select! {
        _ = ctx.cancel.cancelled() => return None,
        fetched = ctx.source.fetch(&ctx.novel_id, chapter_number) => fetched,
    };

    Some(match fetched {
        Ok(chapter) if chapter.chapter_number == chapter_number => ImportOutcome::Success(chapter),
        Ok(chapter) => ImportOutcome::Failed {
            chapter_number,
            reason: FailureReason::Fetch(format!(
                "source returned chapter {} instead",
                chapter.chapter_number
            )),
        },
        Err(FetchError::NotFound) => ImportOutcome::Unavailable { chapter_number },
        Err(FetchError::Empty) => ImportOutcome::Failed {
            chapter_number,
            reason: FailureReason::EmptyContent,
        },
        Err(FetchError::Failed(message)) => ImportOutcome::Failed {
            chapter_number,
            reason: FailureReason::Fetch(message),
        },
    })
}

/// Pushes `1..=latest_chapter` into the queue, then closes it by dropping
/// the sender. Stops early on cancellation or once the end-of-series ceiling
/// drops below the next number.
pub(crate) async fn produce(
    queue: mpsc::Sender<u32>,
    latest_chapter: u32,
    ceiling: watch::Receiver<u32>,
    cancel: CancellationToken,
) {
    for chapter_number in 1..=latest_chapter {
        if chapter_number > *ceiling.borrow() {
            tracing::debug!(chapter_number, "end of series reached; stop queueing");
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = queue.send(chapter_number) => {
                if sent.is_err() {
                    break;
                }
                tracing::trace!(chapter_number, "queued chapter");
            }
        }
    }
}
