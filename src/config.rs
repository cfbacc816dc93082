use std::fmt;
use std::path::PathBuf;

use anyhow::Context as _;

pub const DEFAULT_WORKER_COUNT: usize = 10;
pub const DEFAULT_SOURCE_URL_TEMPLATE: &str =
    "https://www.lightnovelworld.co/novel/{novel_id}/chapter-{chapter_no}";

/// What the aggregator does when the store rejects a fetched chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistFailurePolicy {
    /// Stop the whole run and report a fatal error.
    #[default]
    Abort,
    /// Mark the chapter as errored and keep importing its siblings.
    MarkError,
}

impl PersistFailurePolicy {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "" | "abort" => Ok(Self::Abort),
            "mark-error" => Ok(Self::MarkError),
            other => anyhow::bail!(
                "unsupported persist failure policy: {other} (expected abort or mark-error)"
            ),
        }
    }
}

impl fmt::Display for PersistFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Abort => "abort",
            Self::MarkError => "mark-error",
        })
    }
}

/// Per-run tuning for the import orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSettings {
    pub worker_count: usize,
    pub persist_failure: PersistFailurePolicy,
}

impl ImportSettings {
    pub fn new(worker_count: usize, persist_failure: PersistFailurePolicy) -> Self {
        Self {
            worker_count: worker_count.max(1),
            persist_failure,
        }
    }
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self::new(DEFAULT_WORKER_COUNT, PersistFailurePolicy::default())
    }
}

/// How to invoke the external chapter scraper.
///
/// The scraper is called as `<program> <args...> <novel_id> <chapter_no>`.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub source_url_template: String,
}

impl ScraperConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        let program =
            non_empty("CHAPTERIMPORT_SCRAPER_PROGRAM").unwrap_or_else(|| "python3".to_owned());
        let args = match non_empty("CHAPTERIMPORT_SCRAPER_ARGS") {
            Some(raw) => raw.split_whitespace().map(str::to_owned).collect(),
            None => ["-m", "novel_updates_scraper.client", "import-chapter"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
        };
        let working_dir = non_empty("CHAPTERIMPORT_SCRAPER_DIR").map(PathBuf::from);
        let source_url_template = non_empty("CHAPTERIMPORT_SOURCE_URL_TEMPLATE")
            .unwrap_or_else(|| DEFAULT_SOURCE_URL_TEMPLATE.to_owned());

        validate_url_template(&source_url_template)
            .context("invalid CHAPTERIMPORT_SOURCE_URL_TEMPLATE")?;

        Ok(Self {
            program,
            args,
            working_dir,
            source_url_template,
        })
    }

    pub fn source_url(&self, novel_id: &str, chapter_number: u32) -> String {
        self.source_url_template
            .replace("{novel_id}", novel_id)
            .replace("{chapter_no}", &chapter_number.to_string())
    }
}

fn validate_url_template(template: &str) -> anyhow::Result<()> {
    if !template.contains("{chapter_no}") {
        anyhow::bail!("template must contain {{chapter_no}}: {template}");
    }
    Ok(())
}
