use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;
use plotline::cli::{Command, GlobalArgs, OutlineCommand};
use plotline::config::Settings;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    plotline::logging::init().context("init logging")?;

    let cli = plotline::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        // Classification is pure; it needs no settings.
        Command::Classify(args) => {
            plotline::changelog::print_classification(args).context("classify")?;
        }
        Command::Outline { command } => {
            let settings = settings(&cli.global).await?;
            run_outline(command, &settings).await?;
        }
        Command::Changelog(args) => {
            let settings = settings(&cli.global).await?;
            plotline::changelog::run(args, &settings)
                .await
                .context("changelog")?;
        }
        Command::Settings { command } => {
            let settings = settings(&cli.global).await?;
            plotline::config::run(command, &settings)
                .await
                .context("settings")?;
        }
    }

    Ok(())
}

async fn settings(global: &GlobalArgs) -> anyhow::Result<Settings> {
    plotline::config::resolve(global)
        .await
        .context("resolve settings")
}

async fn run_outline(command: OutlineCommand, settings: &Settings) -> anyhow::Result<()> {
    match command {
        OutlineCommand::List(args) => plotline::outline::list(args, settings)
            .await
            .context("outline list"),
        OutlineCommand::Chapters(args) => plotline::outline::chapters(args, settings)
            .await
            .context("outline chapters"),
        OutlineCommand::Expand(args) => plotline::outline::expand(args, settings)
            .await
            .context("outline expand"),
        OutlineCommand::ExpandAll(args) => plotline::outline::expand_all(args, settings)
            .await
            .context("outline expand-all"),
        OutlineCommand::Reset(args) => plotline::outline::reset(args, settings)
            .await
            .context("outline reset"),
        OutlineCommand::CreateChapter(args) => plotline::outline::create_chapter(args, settings)
            .await
            .context("outline create-chapter"),
    }
}
