use std::collections::BTreeMap;
use std::fmt;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::PersistFailurePolicy;
use crate::import::ImportOutcome;
use crate::import::progress::{ProgressEmitter, ProgressEvent};
use crate::model::{ChapterState, ChapterStatus, NewChapter, NovelId};
use crate::store::ChapterStore;

/// Per-chapter status table of one run. Only the aggregator writes to it.
#[derive(Debug, Clone)]
pub struct RunState {
    total: u32,
    statuses: BTreeMap<u32, ChapterState>,
    persisted_count: usize,
}

impl RunState {
    pub fn new(total: u32) -> Self {
        Self {
            total,
            statuses: (1..=total).map(|n| (n, ChapterState::Pending)).collect(),
            persisted_count: 0,
        }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn persisted_count(&self) -> usize {
        self.persisted_count
    }

    pub fn state(&self, chapter_number: u32) -> Option<ChapterState> {
        self.statuses.get(&chapter_number).copied()
    }

    /// Moves a pending chapter to `state`. Returns false (and leaves the table
    /// alone) for unknown chapters and for chapters that are already terminal.
    pub fn resolve(&mut self, chapter_number: u32, state: ChapterState) -> bool {
        let Some(current) = self.statuses.get_mut(&chapter_number) else {
            tracing::warn!(chapter_number, "outcome for chapter outside of run range");
            return false;
        };
        if current.is_terminal() {
            tracing::warn!(
                chapter_number,
                current = %current,
                ignored = %state,
                "chapter already resolved"
            );
            return false;
        }
        *current = state;
        true
    }

    pub fn record_persisted(&mut self) {
        self.persisted_count += 1;
    }

    /// Resolves every pending chapter above `ceiling` as unavailable.
    pub fn resolve_beyond(&mut self, ceiling: u32) -> usize {
        let mut resolved = 0;
        for (_, state) in self
            .statuses
            .range_mut(ceiling.saturating_add(1)..)
            .filter(|(_, state)| !state.is_terminal())
        {
            *state = ChapterState::Unavailable;
            resolved += 1;
        }
        resolved
    }

    pub fn statuses(&self) -> impl Iterator<Item = ChapterStatus> + '_ {
        self.statuses
            .iter()
            .map(|(&chapter_number, &state)| ChapterStatus {
                chapter_number,
                state,
            })
    }

    pub fn snapshot(&self) -> ProgressEvent {
        ProgressEvent::Status(
            self.statuses()
                .map(|status| (status.chapter_number, status.state))
                .collect(),
        )
    }

    pub fn into_statuses(self) -> BTreeMap<u32, ChapterState> {
        self.statuses
    }

    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for state in self.statuses.values() {
            match state {
                ChapterState::Pending => counts.pending += 1,
                ChapterState::Downloaded => counts.downloaded += 1,
                ChapterState::Skipped => counts.skipped += 1,
                ChapterState::Error => counts.error += 1,
                ChapterState::Unavailable => counts.unavailable += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub pending: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub error: usize,
    pub unavailable: usize,
}

impl fmt::Display for StateCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} downloaded, {} skipped, {} failed, {} unavailable",
            self.downloaded, self.skipped, self.error, self.unavailable
        )?;
        if self.pending > 0 {
            write!(f, ", {} pending", self.pending)?;
        }
        Ok(())
    }
}

/// How the outcome channel ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DrainEnd {
    /// Every worker finished and every outcome was applied.
    Drained,
    /// A store failure stopped the run; later outcomes were discarded.
    Aborted(String),
}

pub(crate) struct Aggregator<'a> {
    novel_id: &'a NovelId,
    store: &'a dyn ChapterStore,
    policy: PersistFailurePolicy,
    ceiling: &'a watch::Sender<u32>,
    cancel: &'a CancellationToken,
    state: RunState,
}

impl<'a> Aggregator<'a> {
    pub(crate) fn new(
        novel_id: &'a NovelId,
        store: &'a dyn ChapterStore,
        policy: PersistFailurePolicy,
        ceiling: &'a watch::Sender<u32>,
        cancel: &'a CancellationToken,
        total: u32,
    ) -> Self {
        Self {
            novel_id,
            store,
            policy,
            ceiling,
            cancel,
            state: RunState::new(total),
        }
    }

    pub(crate) fn state(&self) -> &RunState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut RunState {
        &mut self.state
    }

    pub(crate) fn into_state(self) -> RunState {
        self.state
    }

    /// Applies outcomes until every sender is gone and the channel is empty.
    ///
    /// A dropped progress receiver cancels the run but draining continues, so
    /// the workers can wind down and chapters that were already fetched still
    /// get persisted.
    pub(crate) async fn drain(
        &mut self,
        outcomes: &mut mpsc::Receiver<ImportOutcome>,
        emitter: &mut ProgressEmitter,
    ) -> DrainEnd {
        let mut aborted: Option<String> = None;
        let mut client_gone = !emitter.is_connected();
        if client_gone {
            self.cancel.cancel();
        }

        loop {
            tokio::select! {
                outcome = outcomes.recv() => {
                    let Some(outcome) = outcome else {
                        break;
                    };
                    if aborted.is_some() {
                        tracing::debug!(
                            chapter_number = outcome.chapter_number(),
                            "discarding outcome after abort"
                        );
                        continue;
                    }
                    if let Err(message) = self.apply(outcome).await {
                        tracing::error!(novel_id = %self.novel_id, %message, "aborting import");
                        self.cancel.cancel();
                        aborted = Some(message);
                    }
                    if !emitter.emit(self.state.snapshot()).await && !client_gone {
                        // The emitter already logged the loss.
                        client_gone = true;
                        self.cancel.cancel();
                    }
                }
                _ = emitter.closed(), if !client_gone => {
                    tracing::warn!(
                        novel_id = %self.novel_id,
                        "progress client disconnected; cancelling import"
                    );
                    client_gone = true;
                    emitter.mark_disconnected();
                    self.cancel.cancel();
                }
            }
        }

        match aborted {
            Some(message) => DrainEnd::Aborted(message),
            None => DrainEnd::Drained,
        }
    }

    async fn apply(&mut self, outcome: ImportOutcome) -> Result<(), String> {
        match outcome {
            ImportOutcome::Success(chapter) => {
                let chapter_number = chapter.chapter_number;
                let record = NewChapter::from_fetched(self.novel_id, chapter);
                match self.store.create(&record).await {
                    Ok(()) => {
                        self.state.resolve(chapter_number, ChapterState::Downloaded);
                        self.state.record_persisted();
                        tracing::debug!(
                            chapter_number,
                            persisted = self.state.persisted_count(),
                            total = self.state.total(),
                            "chapter saved"
                        );
                    }
                    Err(err) => {
                        self.state.resolve(chapter_number, ChapterState::Error);
                        match self.policy {
                            PersistFailurePolicy::Abort => {
                                return Err(format!("save chapter {chapter_number}: {err}"));
                            }
                            PersistFailurePolicy::MarkError => {
                                tracing::warn!(chapter_number, %err, "failed to save chapter");
                            }
                        }
                    }
                }
            }
            ImportOutcome::Skipped { chapter_number } => {
                tracing::debug!(chapter_number, "chapter already imported; skipped");
                self.state.resolve(chapter_number, ChapterState::Skipped);
            }
            ImportOutcome::Failed {
                chapter_number,
                reason,
            } => {
                tracing::warn!(chapter_number, %reason, "failed to import chapter");
                self.state.resolve(chapter_number, ChapterState::Error);
            }
            ImportOutcome::Unavailable { chapter_number } => {
                self.state
                    .resolve(chapter_number, ChapterState::Unavailable);
                let lowered = self.ceiling.send_if_modified(|ceiling| {
                    if chapter_number < *ceiling {
                        *ceiling = chapter_number;
                        true
                    } else {
                        false
                    }
                });
                if lowered {
                    tracing::info!(chapter_number, "source has no such chapter; treating as end of series");
                }
            }
        }
        Ok(())
    }
}
