use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_WORKER_COUNT, ImportSettings, PersistFailurePolicy};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage works in the local catalog.
    Novel {
        #[command(subcommand)]
        command: NovelCommand,
    },
    /// Run the scraper for a single chapter and print the result as JSON.
    Fetch(FetchArgs),
    /// Import every chapter of a work, printing progress events to stdout.
    Import(ImportArgs),
}

#[derive(Debug, Subcommand)]
pub enum NovelCommand {
    Add(NovelAddArgs),
    Show(NovelShowArgs),
}

#[derive(Debug, Clone, Args)]
pub struct CatalogArgs {
    /// Directory holding the chapter catalog.
    #[arg(long, env = "CHAPTERIMPORT_DATA_DIR", default_value = "workspace-catalog")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct ImportTuningArgs {
    /// Number of chapters fetched concurrently.
    #[arg(long, env = "CHAPTERIMPORT_WORKERS", default_value_t = DEFAULT_WORKER_COUNT)]
    pub workers: usize,

    /// What to do when a fetched chapter cannot be saved: abort or mark-error.
    #[arg(
        long,
        env = "CHAPTERIMPORT_ON_PERSIST_FAILURE",
        default_value = "abort",
        value_parser = PersistFailurePolicy::parse
    )]
    pub on_persist_failure: PersistFailurePolicy,
}

impl ImportTuningArgs {
    pub fn settings(&self) -> ImportSettings {
        ImportSettings::new(self.workers, self.on_persist_failure)
    }
}

#[derive(Debug, Args)]
pub struct NovelAddArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,

    /// Work identifier (e.g. `shadow-slave`).
    #[arg(long)]
    pub id: String,

    #[arg(long)]
    pub title: Option<String>,

    /// Highest chapter number currently published.
    #[arg(long)]
    pub latest_chapter: u32,
}

#[derive(Debug, Args)]
pub struct NovelShowArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,

    #[arg(long)]
    pub id: String,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    #[arg(long)]
    pub novel_id: String,

    #[arg(long)]
    pub chapter: u32,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,

    #[command(flatten)]
    pub tuning: ImportTuningArgs,

    #[arg(long)]
    pub novel_id: String,
}
