use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::chapter_text::{normalize_body, normalize_title};
use crate::config::ScraperConfig;
use crate::model::{FetchedChapter, NovelId};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The source has no such chapter; treated as the end of the series.
    #[error("chapter not found")]
    NotFound,
    #[error("chapter has empty content")]
    Empty,
    #[error("{0}")]
    Failed(String),
}

#[async_trait]
pub trait ChapterSource: Send + Sync {
    async fn fetch(
        &self,
        novel_id: &NovelId,
        chapter_number: u32,
    ) -> Result<FetchedChapter, FetchError>;
}

/// Fetches chapters by running the external scraper once per chapter.
///
/// The child is killed if the returned future is dropped, so cancelling an
/// import also stops its in-flight scrapes.
#[derive(Debug, Clone)]
pub struct ScriptChapterSource {
    config: ScraperConfig,
}

impl ScriptChapterSource {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }

    fn command(&self, novel_id: &NovelId, chapter_number: u32) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg(novel_id.as_str())
            .arg(chapter_number.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl ChapterSource for ScriptChapterSource {
    async fn fetch(
        &self,
        novel_id: &NovelId,
        chapter_number: u32,
    ) -> Result<FetchedChapter, FetchError> {
        tracing::debug!(
            program = %self.config.program,
            novel_id = %novel_id,
            chapter_number,
            "scrape chapter"
        );

        let output = self
            .command(novel_id, chapter_number)
            .output()
            .await
            .map_err(|err| {
                FetchError::Failed(format!("spawn scraper {}: {err}", self.config.program))
            })?;

        if !output.stderr.is_empty() {
            tracing::debug!(
                chapter_number,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "scraper stderr"
            );
        }

        // The scraper prints a JSON error object even when it exits non-zero.
        let parsed = parse_scraper_output(&output.stdout);
        if !output.status.success() && parsed.is_err() {
            return Err(FetchError::Failed(format!(
                "scraper failed ({})",
                output.status
            )));
        }

        let fallback_url = self
            .config
            .source_url(novel_id.as_str(), chapter_number);
        parsed?.into_chapter(chapter_number, fallback_url)
    }
}

#[derive(Debug, Deserialize)]
struct ScraperOutput {
    status: u16,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn parse_scraper_output(stdout: &[u8]) -> Result<ScraperOutput, FetchError> {
    // Only the last non-empty line is the result; anything before is chatter.
    let text = String::from_utf8_lossy(stdout);
    let line = text
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| FetchError::Failed("scraper produced no output".to_owned()))?;
    serde_json::from_str(line.trim())
        .map_err(|err| FetchError::Failed(format!("parse scraper output: {err}")))
}

impl ScraperOutput {
    fn into_chapter(
        self,
        chapter_number: u32,
        fallback_url: String,
    ) -> Result<FetchedChapter, FetchError> {
        match self.status {
            200 => {}
            204 => return Err(FetchError::Empty),
            404 => return Err(FetchError::NotFound),
            status => {
                let message = self.error.unwrap_or_else(|| "unknown error".to_owned());
                return Err(FetchError::Failed(format!(
                    "scraper status {status}: {message}"
                )));
            }
        }

        let body = normalize_body(self.body.as_deref().unwrap_or_default());
        if body.is_empty() {
            return Err(FetchError::Empty);
        }

        let title = self
            .title
            .as_deref()
            .map(normalize_title)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| format!("Chapter {chapter_number}"));
        let source_url = self
            .url
            .map(|u| u.trim().to_owned())
            .filter(|u| !u.is_empty())
            .unwrap_or(fallback_url);

        Ok(FetchedChapter {
            chapter_number,
            title,
            body,
            source_url,
        })
    }
}
