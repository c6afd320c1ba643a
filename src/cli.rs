use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::model::ExpansionStrategy;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Overrides for stored settings and `PLOTLINE_*` variables.
#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Backend API base URL (e.g. http://localhost:8000/api).
    #[arg(long, global = true)]
    pub api_base: Option<String>,

    /// Bearer token for the backend API.
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Directory for local state (settings, changelog cache).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Outline {
        #[command(subcommand)]
        command: OutlineCommand,
    },
    Changelog(ChangelogArgs),
    /// Classify a single commit message.
    Classify(ClassifyArgs),
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum OutlineCommand {
    /// List outlines of a project in order.
    List(ListArgs),
    /// Show the chapters and plans of one outline.
    Chapters(ChaptersArgs),
    /// Generate chapter plans for one outline, preview them, and commit.
    Expand(ExpandArgs),
    /// Generate chapter plans for every unexpanded outline of a project.
    ExpandAll(ExpandAllArgs),
    /// Delete the chapters of every expanded outline of a project.
    Reset(ResetArgs),
    /// Create exactly one chapter from an outline (one-to-one projects).
    CreateChapter(CreateChapterArgs),
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long)]
    pub project: String,

    /// Also print summary, characters and organizations from each structure.
    #[arg(long, default_value_t = false)]
    pub details: bool,
}

#[derive(Debug, Args)]
pub struct ChaptersArgs {
    #[arg(long)]
    pub outline: String,
}

#[derive(Debug, Args)]
pub struct GenerationArgs {
    /// Chapters to generate per outline, 1-20 (defaults to the stored setting).
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub chapters: Option<u32>,

    /// balanced | climax | detail (defaults to the stored setting).
    #[arg(long)]
    pub strategy: Option<ExpansionStrategy>,

    /// Commit the generated plans without asking.
    #[arg(long, default_value_t = false)]
    pub yes: bool,

    /// Delete existing chapters of the outline before regenerating.
    #[arg(long, default_value_t = false)]
    pub replace: bool,
}

#[derive(Debug, Args)]
pub struct ExpandArgs {
    #[arg(long)]
    pub project: String,

    #[arg(long)]
    pub outline: String,

    #[command(flatten)]
    pub generation: GenerationArgs,
}

#[derive(Debug, Args)]
pub struct ExpandAllArgs {
    #[arg(long)]
    pub project: String,

    #[command(flatten)]
    pub generation: GenerationArgs,
}

#[derive(Debug, Args)]
pub struct ResetArgs {
    #[arg(long)]
    pub project: String,

    /// Required; deletion cannot be undone.
    #[arg(long, default_value_t = false)]
    pub yes: bool,
}

#[derive(Debug, Args)]
pub struct CreateChapterArgs {
    #[arg(long)]
    pub outline: String,
}

#[derive(Debug, Args)]
pub struct ChangelogArgs {
    /// Ignore the local cache and fetch again.
    #[arg(long, default_value_t = false)]
    pub refresh: bool,

    #[arg(long, default_value_t = 1)]
    pub page: u32,

    /// Print JSON instead of the grouped text view.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ClassifyArgs {
    pub message: String,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum SettingsCommand {
    /// Print the effective settings.
    Show,
    /// Persist the effective settings (without the token).
    Save,
}
