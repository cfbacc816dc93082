pub mod server;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;

use crate::config::{ImportSettings, ScraperConfig};
use crate::import::ImportOrchestrator;
use crate::source::ScriptChapterSource;
use crate::store::LocalFsCatalog;

/// Wires the filesystem catalog and the scraper subprocess into an
/// orchestrator. Scraper settings come from the environment.
pub fn build_orchestrator(
    data_dir: &Path,
    settings: ImportSettings,
) -> anyhow::Result<ImportOrchestrator> {
    let scraper = ScraperConfig::from_env().context("load scraper config")?;
    tracing::debug!(?scraper, data_dir = %data_dir.display(), "building orchestrator");

    let catalog = Arc::new(LocalFsCatalog::new(data_dir));
    Ok(ImportOrchestrator::new(
        catalog.clone(),
        catalog.clone(),
        catalog,
        Arc::new(ScriptChapterSource::new(scraper)),
        settings,
    ))
}
