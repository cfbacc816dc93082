//! Chapter import pipeline.
//!
//! One run imports chapters `1..=latest_chapter` of a single work:
//!
//! ```text
//! producer --(bounded queue)--> N workers --(outcome channel)--> aggregator --> progress stream
//!                                 |  dedup oracle                   |  chapter store
//!                                 |  chapter source                 |
//! ```
//!
//! The aggregator is the only owner of the status table and the only caller
//! of the chapter store.

pub mod aggregator;
pub mod progress;
mod worker;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::ImportSettings;
use crate::import::aggregator::{Aggregator, DrainEnd, StateCounts};
use crate::import::progress::{ProgressEmitter, ProgressEvent};
use crate::import::worker::WorkerContext;
use crate::model::{ChapterState, FetchedChapter, NovelId};
use crate::source::ChapterSource;
use crate::store::{ChapterStore, DedupOracle, NovelDirectory};

/// What a worker reports for one chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Success(FetchedChapter),
    /// Already stored before this run.
    Skipped { chapter_number: u32 },
    Failed {
        chapter_number: u32,
        reason: FailureReason,
    },
    /// The source reports the chapter does not exist (end of series).
    Unavailable { chapter_number: u32 },
}

impl ImportOutcome {
    pub fn chapter_number(&self) -> u32 {
        match self {
            Self::Success(chapter) => chapter.chapter_number,
            Self::Skipped { chapter_number }
            | Self::Failed { chapter_number, .. }
            | Self::Unavailable { chapter_number } => *chapter_number,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    EmptyContent,
    Fetch(String),
    Lookup(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyContent => f.write_str("skip empty: chapter has no content"),
            Self::Fetch(message) => write!(f, "fetch: {message}"),
            Self::Lookup(message) => write!(f, "dedup lookup: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every chapter reached a terminal state.
    Completed,
    /// A precondition failed before any worker started.
    Rejected(String),
    /// A fatal failure stopped the run early.
    Aborted(String),
    /// The run was cancelled (client gone or shutdown) before finishing.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ImportReport {
    pub novel_id: Option<NovelId>,
    pub outcome: RunOutcome,
    pub statuses: BTreeMap<u32, ChapterState>,
    pub persisted: usize,
}

impl ImportReport {
    fn rejected(novel_id: Option<NovelId>, message: String) -> Self {
        Self {
            novel_id,
            outcome: RunOutcome::Rejected(message),
            statuses: BTreeMap::new(),
            persisted: 0,
        }
    }

    pub fn count(&self, state: ChapterState) -> usize {
        self.statuses.values().filter(|s| **s == state).count()
    }
}

pub struct ImportOrchestrator {
    directory: Arc<dyn NovelDirectory>,
    oracle: Arc<dyn DedupOracle>,
    store: Arc<dyn ChapterStore>,
    source: Arc<dyn ChapterSource>,
    settings: ImportSettings,
}

impl ImportOrchestrator {
    pub fn new(
        directory: Arc<dyn NovelDirectory>,
        oracle: Arc<dyn DedupOracle>,
        store: Arc<dyn ChapterStore>,
        source: Arc<dyn ChapterSource>,
        settings: ImportSettings,
    ) -> Self {
        Self {
            directory,
            oracle,
            store,
            source,
            settings,
        }
    }

    pub fn settings(&self) -> ImportSettings {
        self.settings
    }

    /// Resolves `raw_novel_id` through the novel directory and imports its
    /// chapters. Lookup failures are reported as a single error event.
    pub async fn run_for_novel(
        &self,
        raw_novel_id: &str,
        mut emitter: ProgressEmitter,
        cancel: CancellationToken,
    ) -> ImportReport {
        let novel_id = match NovelId::parse(raw_novel_id) {
            Ok(novel_id) => novel_id,
            Err(err) => {
                let message = format!("{err:#}");
                emitter.emit(ProgressEvent::Error(message.clone())).await;
                return ImportReport::rejected(None, message);
            }
        };

        let novel = match self.directory.get(&novel_id).await {
            Ok(Some(novel)) => novel,
            Ok(None) => {
                let message = format!("novel not found: {novel_id}");
                emitter.emit(ProgressEvent::Error(message.clone())).await;
                return ImportReport::rejected(Some(novel_id), message);
            }
            Err(err) => {
                tracing::error!(%novel_id, ?err, "novel lookup failed");
                let message = format!("look up novel {novel_id}: {err:#}");
                emitter.emit(ProgressEvent::Error(message.clone())).await;
                return ImportReport::rejected(Some(novel_id), message);
            }
        };

        self.run(&novel_id, novel.latest_chapter, emitter, cancel)
            .await
    }

    /// Imports chapters `1..=latest_chapter` of `novel_id`, streaming
    /// progress through `emitter`. The stream ends when this returns.
    pub async fn run(
        &self,
        novel_id: &NovelId,
        latest_chapter: u32,
        mut emitter: ProgressEmitter,
        cancel: CancellationToken,
    ) -> ImportReport {
        if latest_chapter == 0 {
            tracing::warn!(%novel_id, "no chapters found; nothing to import");
            let message = "no chapters found".to_owned();
            emitter.emit(ProgressEvent::Error(message.clone())).await;
            return ImportReport::rejected(Some(novel_id.clone()), message);
        }

        let started = Instant::now();
        let worker_count = self.settings.worker_count.max(1);
        tracing::info!(%novel_id, latest_chapter, worker_count, "starting chapter import");

        let (queue_tx, queue_rx) = mpsc::channel::<u32>(worker_count);
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<ImportOutcome>(1);
        let (ceiling_tx, ceiling_rx) = watch::channel(latest_chapter);

        let mut aggregator = Aggregator::new(
            novel_id,
            self.store.as_ref(),
            self.settings.persist_failure,
            &ceiling_tx,
            &cancel,
            latest_chapter,
        );
        if !emitter.emit(aggregator.state().snapshot()).await {
            tracing::warn!(%novel_id, "progress client gone before start; cancelling import");
            cancel.cancel();
        }

        let ctx = WorkerContext {
            novel_id: novel_id.clone(),
            oracle: Arc::clone(&self.oracle),
            source: Arc::clone(&self.source),
            queue: Arc::new(Mutex::new(queue_rx)),
            outcomes: outcome_tx,
            ceiling: ceiling_rx.clone(),
            cancel: cancel.clone(),
        };
        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(worker::run_worker(worker_id, ctx.clone()));
        }
        // Workers hold the only outcome senders from here on.
        drop(ctx);

        let producer = tokio::spawn(worker::produce(
            queue_tx,
            latest_chapter,
            ceiling_rx,
            cancel.clone(),
        ));

        let drained = aggregator.drain(&mut outcome_rx, &mut emitter).await;

        let mut task_failures = 0usize;
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                tracing::error!(%novel_id, ?err, "import worker failed");
                task_failures += 1;
            }
        }
        if let Err(err) = producer.await {
            tracing::error!(%novel_id, ?err, "chapter queue producer failed");
            task_failures += 1;
        }

        let ceiling = *ceiling_tx.borrow();
        let outcome = match drained {
            DrainEnd::Aborted(message) => RunOutcome::Aborted(message),
            DrainEnd::Drained if task_failures > 0 => {
                RunOutcome::Aborted(format!("{task_failures} import task(s) failed"))
            }
            DrainEnd::Drained => {
                aggregator.state_mut().resolve_beyond(ceiling);
                if aggregator.state().counts().pending == 0 {
                    RunOutcome::Completed
                } else if cancel.is_cancelled() {
                    RunOutcome::Cancelled
                } else {
                    RunOutcome::Aborted("import ended with unresolved chapters".to_owned())
                }
            }
        };

        let state = aggregator.into_state();
        let counts = state.counts();
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            RunOutcome::Completed => {
                tracing::info!(%novel_id, %counts, elapsed_ms, "chapter import complete");
                emitter.emit(state.snapshot()).await;
                emitter
                    .emit(ProgressEvent::Complete(completion_message(
                        state.total(),
                        &counts,
                    )))
                    .await;
            }
            RunOutcome::Aborted(message) => {
                tracing::error!(%novel_id, %counts, elapsed_ms, %message, "chapter import aborted");
                emitter.emit(ProgressEvent::Error(message.clone())).await;
            }
            RunOutcome::Cancelled => {
                tracing::warn!(%novel_id, %counts, elapsed_ms, "chapter import cancelled");
                emitter
                    .emit(ProgressEvent::Error("import cancelled".to_owned()))
                    .await;
            }
            RunOutcome::Rejected(_) => {}
        }

        ImportReport {
            novel_id: Some(novel_id.clone()),
            outcome,
            persisted: state.persisted_count(),
            statuses: state.into_statuses(),
        }
    }
}

fn completion_message(total: u32, counts: &StateCounts) -> String {
    format!("all {total} chapters processed: {counts}")
}
