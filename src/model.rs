use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a work in the external catalog (the parent of its chapters).
///
/// Normalized form: lowercase ASCII letters, digits and single dashes,
/// 1 to 255 characters. Safe to use as a single path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NovelId(String);

impl NovelId {
    pub const MAX_LEN: usize = 255;

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > Self::MAX_LEN {
            anyhow::bail!("novel id must be 1 to {} characters long", Self::MAX_LEN);
        }

        let normalized = trimmed.to_ascii_lowercase().replace(' ', "-");
        if !is_dashed_slug(&normalized) {
            anyhow::bail!(
                "novel id can only contain lowercase letters, numbers, or single dashes: {raw:?}"
            );
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_dashed_slug(value: &str) -> bool {
    value.split('-').all(|part| {
        !part.is_empty()
            && part
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    })
}

impl fmt::Display for NovelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for NovelId {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NovelId> for String {
    fn from(value: NovelId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Novel {
    pub novel_id: NovelId,
    pub title: String,
    pub latest_chapter: u32,
    pub created_at: DateTime<Utc>,
}

/// Chapter content as returned by a chapter source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchedChapter {
    pub chapter_number: u32,
    pub title: String,
    pub body: String,
    pub source_url: String,
}

/// A chapter ready to be written to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChapter {
    pub novel_id: NovelId,
    pub chapter_number: u32,
    pub title: String,
    pub body: String,
    pub source_url: String,
}

impl NewChapter {
    pub fn from_fetched(novel_id: &NovelId, fetched: FetchedChapter) -> Self {
        Self {
            novel_id: novel_id.clone(),
            chapter_number: fetched.chapter_number,
            title: fetched.title,
            body: fetched.body,
            source_url: fetched.source_url,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChapter {
    #[serde(flatten)]
    pub chapter: NewChapter,
    pub imported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChapterState {
    Pending,
    Downloaded,
    Skipped,
    Error,
    /// At or past the end of the series reported by the source.
    Unavailable,
}

impl ChapterState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloaded => "downloaded",
            Self::Skipped => "skipped",
            Self::Error => "error",
            Self::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for ChapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChapterStatus {
    pub chapter_number: u32,
    pub state: ChapterState,
}
