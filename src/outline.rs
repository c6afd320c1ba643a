//! `plotline outline ...` commands.

use std::io::Write as _;
use std::sync::Arc;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use crate::api::{HttpNovelApi, NovelApi};
use crate::cli::{
    ChaptersArgs, CreateChapterArgs, ExpandAllArgs, ExpandArgs, GenerationArgs, ListArgs,
    ResetArgs,
};
use crate::config::Settings;
use crate::expansion::{
    CachedPlans, ExpansionParams, ExpansionState, ExpansionTarget, GenerationOutcome,
    Orchestrator, delete_expanded_chapters,
};
use crate::model::ChapterPlan;

fn connect(settings: &Settings) -> anyhow::Result<Arc<HttpNovelApi>> {
    let api = HttpNovelApi::new(&settings.api_base, settings.api_token.clone())?;
    Ok(Arc::new(api))
}

fn params(args: &GenerationArgs, settings: &Settings) -> ExpansionParams {
    ExpansionParams {
        chapter_count: args.chapters.unwrap_or(settings.default_chapter_count),
        strategy: args.strategy.unwrap_or(settings.default_strategy),
    }
}

pub async fn list(args: ListArgs, settings: &Settings) -> anyhow::Result<()> {
    let api = connect(settings)?;
    let mut outlines = api.list_outlines(&args.project).await?;
    outlines.sort_by_key(|o| o.order_index);
    for outline in &outlines {
        println!("{}\t{}", outline.outline_ref(), outline.id);
        if !args.details {
            continue;
        }
        let structure = match outline.structure_document() {
            Ok(structure) => structure,
            Err(err) => {
                tracing::warn!(outline_id = %outline.id, error = %err, "unreadable structure");
                continue;
            }
        };
        if let Some(summary) = structure.summary_text() {
            println!("    {summary}");
        }
        let characters = structure.character_names();
        if !characters.is_empty() {
            println!("    characters: {}", characters.join(", "));
        }
        let organizations = structure.organization_names();
        if !organizations.is_empty() {
            println!("    organizations: {}", organizations.join(", "));
        }
        for scene in &structure.scenes {
            println!("    scene: {} ({})", scene.location, scene.purpose);
        }
    }
    Ok(())
}

pub async fn chapters(args: ChaptersArgs, settings: &Settings) -> anyhow::Result<()> {
    let api = connect(settings)?;
    let existing = api.outline_chapters(&args.outline).await?;
    if !existing.has_chapters {
        println!("outline {} has no chapters yet", args.outline);
        return Ok(());
    }
    for chapter in &existing.chapters {
        println!("chapter {}\t{}\t{}", chapter.chapter_number, chapter.title, chapter.id);
    }
    if let Some(plans) = &existing.expansion_plans {
        println!();
        print_plans(plans);
    }
    Ok(())
}

pub async fn expand(args: ExpandArgs, settings: &Settings) -> anyhow::Result<()> {
    let api = connect(settings)?;
    let outlines = api
        .list_outlines(&args.project)
        .await
        .context("list outlines")?;
    let params = params(&args.generation, settings);

    let mut orchestrator = Orchestrator::new(api);
    let target = ExpansionTarget::Outline {
        project_id: args.project,
        outline_id: args.outline.clone(),
    };
    orchestrator.begin(target, &outlines).await?;

    if let ExpansionState::HasExisting { chapters, plans } = orchestrator.state() {
        println!(
            "outline {} already has {} chapters",
            args.outline,
            chapters.len()
        );
        print_plans(plans);
        if !args.generation.replace {
            println!("pass --replace to delete them and generate new plans");
            orchestrator.close()?;
            return Ok(());
        }
        let deleted = orchestrator.delete_existing().await?;
        println!("deleted {deleted} chapters");
    }

    generate_and_commit(&mut orchestrator, &params, args.generation.yes).await
}

pub async fn expand_all(args: ExpandAllArgs, settings: &Settings) -> anyhow::Result<()> {
    let api = connect(settings)?;
    let params = params(&args.generation, settings);

    let mut orchestrator = Orchestrator::new(api);
    let target = ExpansionTarget::Project {
        project_id: args.project,
    };
    orchestrator.begin(target, &[]).await?;
    generate_and_commit(&mut orchestrator, &params, args.generation.yes).await
}

pub async fn reset(args: ResetArgs, settings: &Settings) -> anyhow::Result<()> {
    if !args.yes {
        anyhow::bail!("refusing to delete chapters without --yes");
    }
    let api = connect(settings)?;
    let outlines = api.list_outlines(&args.project).await?;
    let report = delete_expanded_chapters(&*api, &outlines).await?;
    println!(
        "deleted {} chapters from {} outlines",
        report.chapters, report.outlines
    );
    Ok(())
}

pub async fn create_chapter(args: CreateChapterArgs, settings: &Settings) -> anyhow::Result<()> {
    let api = connect(settings)?;
    let chapter = api.create_single_chapter(&args.outline).await?;
    println!(
        "created chapter {}\t{}\t{}",
        chapter.chapter_number, chapter.title, chapter.id
    );
    Ok(())
}

async fn generate_and_commit(
    orchestrator: &mut Orchestrator,
    params: &ExpansionParams,
    assume_yes: bool,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let progress = {
        let mut states = orchestrator.subscribe();
        tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let state = states.borrow_and_update().clone();
                if let ExpansionState::Generating { message, percent } = state
                    && !message.is_empty()
                {
                    eprintln!("[{percent:>3}%] {message}");
                }
            }
        })
    };

    let outcome = orchestrator.generate(params, cancel).await;
    ctrl_c.abort();
    progress.abort();

    if outcome? == GenerationOutcome::Cancelled {
        println!("generation cancelled");
        return Ok(());
    }

    let Some(plans) = orchestrator.cached_plans() else {
        anyhow::bail!("generation finished without cached plans");
    };
    print_cached(plans);

    let total = plans.plan_count();
    if total == 0 {
        println!("nothing to commit");
        orchestrator.cancel_preview()?;
        return Ok(());
    }
    if !assume_yes && !confirm(&format!("create {total} chapters from these plans?")).await? {
        orchestrator.cancel_preview()?;
        orchestrator.discard_plans()?;
        println!("plans discarded");
        return Ok(());
    }

    let report = orchestrator.commit().await?;
    println!("created {} chapters", report.created);
    if !report.skipped.is_empty() {
        println!("skipped {} outlines with no plans:", report.skipped.len());
        for title in &report.skipped {
            println!("  {title}");
        }
    }
    if report.failed > 0 {
        println!("{} outlines failed:", report.failed);
        for error in &report.errors {
            println!("  {error}");
        }
    }
    Ok(())
}

fn print_cached(plans: &CachedPlans) {
    match plans {
        CachedPlans::Single(result) => {
            println!(
                "{} ({}, {} chapters)",
                result.outline_title, result.expansion_strategy, result.actual_chapter_count
            );
            print_plans(&result.chapter_plans);
        }
        CachedPlans::Batch { result, .. } => {
            for expansion in &result.expansion_results {
                println!(
                    "{} ({} chapters)",
                    expansion.outline_title, expansion.actual_chapter_count
                );
                print_plans(&expansion.chapter_plans);
            }
            for skipped in &result.skipped_outlines {
                println!("skipped {}: {}", skipped.outline_title, skipped.reason);
            }
        }
    }
}

fn print_plans(plans: &[ChapterPlan]) {
    for plan in plans {
        println!(
            "  {}. {} (~{} words)",
            plan.sub_index, plan.title, plan.estimated_words
        );
        if !plan.plot_summary.is_empty() {
            println!("     {}", plan.plot_summary);
        }
    }
}

async fn confirm(prompt: &str) -> anyhow::Result<bool> {
    let prompt = prompt.to_owned();
    tokio::task::spawn_blocking(move || -> anyhow::Result<bool> {
        print!("{prompt} [y/N] ");
        std::io::stdout().flush().context("flush stdout")?;
        let mut answer = String::new();
        std::io::stdin()
            .read_line(&mut answer)
            .context("read confirmation")?;
        Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
    })
    .await
    .context("confirmation task")?
}
