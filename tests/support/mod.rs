#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chapterimport::config::{ImportSettings, PersistFailurePolicy};
use chapterimport::import::ImportOrchestrator;
use chapterimport::import::progress::ProgressEvent;
use chapterimport::model::{ChapterState, FetchedChapter, NewChapter, Novel, NovelId};
use chapterimport::source::{ChapterSource, FetchError};
use chapterimport::store::{ChapterStore, DedupOracle, NovelDirectory, StoreError};
use tokio::sync::mpsc;

pub fn novel_id(raw: &str) -> NovelId {
    NovelId::parse(raw).unwrap()
}

/// In-memory catalog: novel directory, dedup oracle, and chapter store.
#[derive(Default)]
pub struct MemoryCatalog {
    novels: Mutex<HashMap<NovelId, Novel>>,
    chapters: Mutex<BTreeMap<(NovelId, u32), NewChapter>>,
    failing_creates: Mutex<BTreeSet<u32>>,
    failing_lookups: Mutex<BTreeSet<u32>>,
    creates: AtomicUsize,
}

impl MemoryCatalog {
    pub fn with_novel(novel_id: &NovelId, latest_chapter: u32) -> Arc<Self> {
        let catalog = Self::default();
        catalog.novels.lock().unwrap().insert(
            novel_id.clone(),
            Novel {
                novel_id: novel_id.clone(),
                title: novel_id.to_string(),
                latest_chapter,
                created_at: chrono::Utc::now(),
            },
        );
        Arc::new(catalog)
    }

    pub fn preload(&self, novel_id: &NovelId, chapter_number: u32) {
        self.chapters.lock().unwrap().insert(
            (novel_id.clone(), chapter_number),
            NewChapter {
                novel_id: novel_id.clone(),
                chapter_number,
                title: format!("old {chapter_number}"),
                body: "old".to_owned(),
                source_url: String::new(),
            },
        );
    }

    pub fn fail_create(&self, chapter_number: u32) {
        self.failing_creates.lock().unwrap().insert(chapter_number);
    }

    pub fn fail_lookup(&self, chapter_number: u32) {
        self.failing_lookups.lock().unwrap().insert(chapter_number);
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn stored(&self, novel_id: &NovelId) -> Vec<u32> {
        self.chapters
            .lock()
            .unwrap()
            .keys()
            .filter(|(id, _)| id == novel_id)
            .map(|(_, n)| *n)
            .collect()
    }

    pub fn chapter(&self, novel_id: &NovelId, chapter_number: u32) -> Option<NewChapter> {
        self.chapters
            .lock()
            .unwrap()
            .get(&(novel_id.clone(), chapter_number))
            .cloned()
    }
}

#[async_trait]
impl NovelDirectory for MemoryCatalog {
    async fn get(&self, novel_id: &NovelId) -> anyhow::Result<Option<Novel>> {
        Ok(self.novels.lock().unwrap().get(novel_id).cloned())
    }
}

#[async_trait]
impl DedupOracle for MemoryCatalog {
    async fn exists(&self, chapter_number: u32, novel_id: &NovelId) -> anyhow::Result<bool> {
        if self.failing_lookups.lock().unwrap().contains(&chapter_number) {
            anyhow::bail!("lookup unavailable");
        }
        Ok(self
            .chapters
            .lock()
            .unwrap()
            .contains_key(&(novel_id.clone(), chapter_number)))
    }
}

#[async_trait]
impl ChapterStore for MemoryCatalog {
    async fn create(&self, chapter: &NewChapter) -> Result<(), StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self
            .failing_creates
            .lock()
            .unwrap()
            .contains(&chapter.chapter_number)
        {
            return Err(StoreError::Storage(anyhow::anyhow!("disk full")));
        }
        let key = (chapter.novel_id.clone(), chapter.chapter_number);
        let mut chapters = self.chapters.lock().unwrap();
        if chapters.contains_key(&key) {
            return Err(StoreError::Conflict {
                novel_id: chapter.novel_id.clone(),
                chapter_number: chapter.chapter_number,
            });
        }
        chapters.insert(key, chapter.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Scripted {
    Ok,
    NotFound,
    Empty,
    Fail(&'static str),
    /// Never returns on its own; only cancellation ends the fetch.
    Hang,
}

/// Chapter source answering from a script. Unscripted chapters succeed.
pub struct ScriptedSource {
    script: HashMap<u32, Scripted>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<u32>>,
    started: Option<mpsc::UnboundedSender<u32>>,
}

impl ScriptedSource {
    pub fn new(script: impl IntoIterator<Item = (u32, Scripted)>) -> Self {
        Self {
            script: script.into_iter().collect(),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            started: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Reports every chapter number when its fetch starts.
    pub fn notify_started(mut self, tx: mpsc::UnboundedSender<u32>) -> Self {
        self.started = Some(tx);
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<u32> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort_unstable();
        calls
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChapterSource for ScriptedSource {
    async fn fetch(
        &self,
        _novel_id: &NovelId,
        chapter_number: u32,
    ) -> Result<FetchedChapter, FetchError> {
        self.calls.lock().unwrap().push(chapter_number);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(tx) = &self.started {
            let _ = tx.send(chapter_number);
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.script.get(&chapter_number).cloned().unwrap_or(Scripted::Ok) {
            Scripted::Ok => Ok(FetchedChapter {
                chapter_number,
                title: format!("Chapter {chapter_number}"),
                body: format!("body of chapter {chapter_number}"),
                source_url: format!("https://source.test/{chapter_number}"),
            }),
            Scripted::NotFound => Err(FetchError::NotFound),
            Scripted::Empty => Err(FetchError::Empty),
            Scripted::Fail(message) => Err(FetchError::Failed(message.to_owned())),
            Scripted::Hang => std::future::pending().await,
        }
    }
}

pub fn orchestrator(
    catalog: &Arc<MemoryCatalog>,
    source: &Arc<ScriptedSource>,
    workers: usize,
    policy: PersistFailurePolicy,
) -> ImportOrchestrator {
    ImportOrchestrator::new(
        catalog.clone(),
        catalog.clone(),
        catalog.clone(),
        source.clone(),
        ImportSettings::new(workers, policy),
    )
}

pub async fn collect(mut rx: mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

pub fn last_status(events: &[ProgressEvent]) -> BTreeMap<u32, ChapterState> {
    events
        .iter()
        .rev()
        .find_map(|event| match event {
            ProgressEvent::Status(table) => Some(table.clone()),
            _ => None,
        })
        .unwrap_or_default()
}
