use std::process::ExitCode;

use anyhow::Context as _;
use chapterimport::cli::{Cli, Command, NovelCommand};
use chapterimport::commands;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    chapterimport::logging::init("info").context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        Command::Novel {
            command: NovelCommand::Add(args),
        } => {
            commands::novel_add(args).await.context("novel add")?;
        }
        Command::Novel {
            command: NovelCommand::Show(args),
        } => {
            commands::novel_show(args).await.context("novel show")?;
        }
        Command::Fetch(args) => {
            commands::fetch(args).await.context("fetch")?;
        }
        Command::Import(args) => {
            commands::import(args).await.context("import")?;
        }
    }

    Ok(())
}
