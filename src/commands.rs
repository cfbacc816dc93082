use std::io::Write as _;

use anyhow::Context as _;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::cli::{FetchArgs, ImportArgs, NovelAddArgs, NovelShowArgs};
use crate::config::ScraperConfig;
use crate::import::RunOutcome;
use crate::import::progress::ProgressEmitter;
use crate::model::{Novel, NovelId};
use crate::source::{ChapterSource as _, ScriptChapterSource};
use crate::store::{LocalFsCatalog, NovelDirectory as _};

pub async fn novel_add(args: NovelAddArgs) -> anyhow::Result<()> {
    let novel_id = NovelId::parse(&args.id).context("parse --id")?;
    let catalog = LocalFsCatalog::new(&args.catalog.data_dir);

    let created_at = match catalog.get(&novel_id).await.context("load novel")? {
        Some(existing) => existing.created_at,
        None => Utc::now(),
    };
    let novel = Novel {
        title: args.title.unwrap_or_else(|| novel_id.to_string()),
        novel_id,
        latest_chapter: args.latest_chapter,
        created_at,
    };
    catalog.put_novel(&novel).await.context("save novel")?;

    tracing::info!(
        novel_id = %novel.novel_id,
        latest_chapter = novel.latest_chapter,
        "novel saved"
    );
    Ok(())
}

pub async fn novel_show(args: NovelShowArgs) -> anyhow::Result<()> {
    let novel_id = NovelId::parse(&args.id).context("parse --id")?;
    let catalog = LocalFsCatalog::new(&args.catalog.data_dir);

    let novel = catalog
        .get(&novel_id)
        .await
        .context("load novel")?
        .ok_or_else(|| anyhow::anyhow!("novel not found: {novel_id}"))?;
    let stored = catalog
        .list_chapter_numbers(&novel_id)
        .await
        .context("list chapters")?;

    let summary = serde_json::json!({
        "novel": novel,
        "stored_chapters": stored.len(),
        "missing_chapters": (1..=novel.latest_chapter)
            .filter(|n| stored.binary_search(n).is_err())
            .count(),
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("serialize novel summary")?
    );
    Ok(())
}

pub async fn fetch(args: FetchArgs) -> anyhow::Result<()> {
    let novel_id = NovelId::parse(&args.novel_id).context("parse --novel-id")?;
    let config = ScraperConfig::from_env().context("load scraper config")?;
    let source = ScriptChapterSource::new(config);

    let chapter = source
        .fetch(&novel_id, args.chapter)
        .await
        .with_context(|| format!("fetch chapter {} of {novel_id}", args.chapter))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&chapter).context("serialize chapter")?
    );
    Ok(())
}

/// Runs one import in the foreground. Progress events are written to stdout
/// in `text/event-stream` framing; Ctrl-C cancels the run.
pub async fn import(args: ImportArgs) -> anyhow::Result<()> {
    let orchestrator =
        crate::app::build_orchestrator(&args.catalog.data_dir, args.tuning.settings())
            .context("build orchestrator")?;

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; cancelling import");
                cancel.cancel();
            }
        })
    };

    let (emitter, mut rx) = ProgressEmitter::channel(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(event.to_wire().as_bytes())
                .and_then(|()| stdout.flush())
                .context("write progress event")?;
        }
        anyhow::Ok(())
    });

    let report = orchestrator
        .run_for_novel(&args.novel_id, emitter, cancel)
        .await;
    ctrl_c.abort();
    printer.await.context("join progress printer")??;

    match report.outcome {
        RunOutcome::Completed => Ok(()),
        RunOutcome::Rejected(message) => anyhow::bail!("import rejected: {message}"),
        RunOutcome::Aborted(message) => anyhow::bail!("import aborted: {message}"),
        RunOutcome::Cancelled => anyhow::bail!("import cancelled"),
    }
}
