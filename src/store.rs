use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt as _;

use crate::model::{NewChapter, Novel, NovelId, StoredChapter};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("chapter {chapter_number} of {novel_id} already exists")]
    Conflict {
        novel_id: NovelId,
        chapter_number: u32,
    },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Resolves a work to its catalog entry, including the known chapter count.
#[async_trait]
pub trait NovelDirectory: Send + Sync {
    async fn get(&self, novel_id: &NovelId) -> anyhow::Result<Option<Novel>>;
}

#[async_trait]
pub trait DedupOracle: Send + Sync {
    async fn exists(&self, chapter_number: u32, novel_id: &NovelId) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait ChapterStore: Send + Sync {
    async fn create(&self, chapter: &NewChapter) -> Result<(), StoreError>;
}

/// Catalog kept as JSON files under a data directory:
///
/// ```text
/// <base>/novels/<novel_id>/novel.json
/// <base>/novels/<novel_id>/chapters/<chapter_number>.json
/// ```
#[derive(Debug, Clone)]
pub struct LocalFsCatalog {
    base_dir: PathBuf,
}

impl LocalFsCatalog {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn novel_dir(&self, novel_id: &NovelId) -> PathBuf {
        self.base_dir.join("novels").join(novel_id.as_str())
    }

    fn novel_json_path(&self, novel_id: &NovelId) -> PathBuf {
        self.novel_dir(novel_id).join("novel.json")
    }

    fn chapters_dir(&self, novel_id: &NovelId) -> PathBuf {
        self.novel_dir(novel_id).join("chapters")
    }

    fn chapter_json_path(&self, novel_id: &NovelId, chapter_number: u32) -> PathBuf {
        self.chapters_dir(novel_id)
            .join(format!("{chapter_number}.json"))
    }

    pub async fn put_novel(&self, novel: &Novel) -> anyhow::Result<()> {
        write_json_atomic(&self.novel_json_path(&novel.novel_id), novel)
            .await
            .context("write novel.json")
    }

    pub async fn list_chapter_numbers(&self, novel_id: &NovelId) -> anyhow::Result<Vec<u32>> {
        let dir = self.chapters_dir(novel_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read dir: {}", dir.display()));
            }
        };

        let mut numbers = Vec::new();
        while let Some(entry) = entries.next_entry().await.context("read dir entry")? {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Ok(number) = stem.parse::<u32>() {
                numbers.push(number);
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }
}

#[async_trait]
impl NovelDirectory for LocalFsCatalog {
    async fn get(&self, novel_id: &NovelId) -> anyhow::Result<Option<Novel>> {
        let path = self.novel_json_path(novel_id);
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }
}

#[async_trait]
impl DedupOracle for LocalFsCatalog {
    async fn exists(&self, chapter_number: u32, novel_id: &NovelId) -> anyhow::Result<bool> {
        let path = self.chapter_json_path(novel_id, chapter_number);
        fs::try_exists(&path)
            .await
            .with_context(|| format!("stat: {}", path.display()))
    }
}

#[async_trait]
impl ChapterStore for LocalFsCatalog {
    async fn create(&self, chapter: &NewChapter) -> Result<(), StoreError> {
        let path = self.chapter_json_path(&chapter.novel_id, chapter.chapter_number);
        let stored = StoredChapter {
            chapter: chapter.clone(),
            imported_at: Utc::now(),
        };
        match write_json_exclusive(&path, &stored).await {
            Ok(()) => Ok(()),
            Err(err) if is_already_exists(&err) => Err(StoreError::Conflict {
                novel_id: chapter.novel_id.clone(),
                chapter_number: chapter.chapter_number,
            }),
            Err(err) => Err(StoreError::Storage(
                err.context(format!("write chapter: {}", path.display())),
            )),
        }
    }
}

fn is_already_exists(err: &anyhow::Error) -> bool {
    err.downcast_ref::<std::io::Error>()
        .is_some_and(|io| io.kind() == std::io::ErrorKind::AlreadyExists)
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let tmp_path = write_tmp_sibling(path, value).await?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

/// Like [`write_json_atomic`] but fails with `AlreadyExists` instead of
/// replacing an existing file. The hard link is the exclusive step.
async fn write_json_exclusive<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let tmp_path = write_tmp_sibling(path, value).await?;
    let linked = fs::hard_link(&tmp_path, path).await;
    if let Err(err) = fs::remove_file(&tmp_path).await {
        tracing::warn!(path = %tmp_path.display(), %err, "failed to remove tmp file");
    }
    linked.map_err(anyhow::Error::from)
}

async fn write_tmp_sibling<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<PathBuf> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    let mut file = fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("create tmp: {}", tmp_path.display()))?;
    file.write_all(&data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    file.sync_all()
        .await
        .with_context(|| format!("sync tmp: {}", tmp_path.display()))?;
    Ok(tmp_path)
}
