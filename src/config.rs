use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use anyhow::Context as _;

use crate::changelog::github::GITHUB_API_BASE;
use crate::cli::{GlobalArgs, SettingsCommand};
use crate::model::ExpansionStrategy;
use crate::store::{self, KvStore, LocalFsKvStore};

pub const SETTINGS_KEY: &str = "settings";

/// Client settings. Persisted values are overlaid by `PLOTLINE_*` environment
/// variables, which are overlaid by command-line flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_base: String,
    /// Never written to disk.
    #[serde(skip)]
    pub api_token: Option<String>,
    /// Location of the store itself, so it is not persisted in it.
    #[serde(skip)]
    pub data_dir: PathBuf,
    pub default_strategy: ExpansionStrategy,
    pub default_chapter_count: u32,
    pub github_api_base: String,
    pub changelog_owner: String,
    pub changelog_repo: String,
    pub changelog_author: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000/api".to_owned(),
            api_token: None,
            data_dir: PathBuf::from(".plotline"),
            default_strategy: ExpansionStrategy::Balanced,
            default_chapter_count: 3,
            github_api_base: GITHUB_API_BASE.to_owned(),
            changelog_owner: "xiamuceer-j".to_owned(),
            changelog_repo: "MuMuAINovel".to_owned(),
            changelog_author: Some("xiamuceer-j".to_owned()),
        }
    }
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::default().apply_env(|name| std::env::var(name).ok())
    }

    /// Overrides every field whose variable is set and non-empty.
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("PLOTLINE_API_BASE") {
            self.api_base = v;
        }
        if let Some(v) = var("PLOTLINE_API_TOKEN") {
            self.api_token = Some(v);
        }
        if let Some(v) = var("PLOTLINE_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = var("PLOTLINE_STRATEGY") {
            self.default_strategy = v.parse()?;
        }
        if let Some(v) = var("PLOTLINE_CHAPTERS") {
            self.default_chapter_count = parse_chapter_count(&v)?;
        }
        if let Some(v) = var("PLOTLINE_GITHUB_API") {
            self.github_api_base = v;
        }
        if let Some(v) = var("PLOTLINE_CHANGELOG_REPO") {
            let Some((owner, repo)) = v.split_once('/') else {
                anyhow::bail!("PLOTLINE_CHANGELOG_REPO must be owner/repo, got {v:?}");
            };
            self.changelog_owner = owner.to_owned();
            self.changelog_repo = repo.to_owned();
        }
        if let Some(v) = var("PLOTLINE_CHANGELOG_AUTHOR") {
            self.changelog_author = (v != "-").then_some(v);
        }
        Ok(self)
    }

    /// Stored settings, or defaults when nothing was saved yet. Fields that
    /// are never persisted are taken from `self`.
    pub async fn load(self, store: &dyn KvStore) -> anyhow::Result<Self> {
        let Some(stored) = store::load::<Settings>(store, SETTINGS_KEY).await? else {
            return Ok(self);
        };
        Ok(Self {
            api_token: self.api_token,
            data_dir: self.data_dir,
            ..stored
        })
    }

    pub async fn save(&self, store: &dyn KvStore) -> anyhow::Result<()> {
        store::save(store, SETTINGS_KEY, self).await?;
        tracing::info!(key = SETTINGS_KEY, "settings saved");
        Ok(())
    }
}

/// Effective settings: stored values, then environment, then flags.
pub async fn resolve(global: &GlobalArgs) -> anyhow::Result<Settings> {
    let env_lookup = |name: &str| std::env::var(name).ok();
    let data_dir = match &global.data_dir {
        Some(dir) => dir.clone(),
        None => Settings::from_env()?.data_dir,
    };
    let store = LocalFsKvStore::new(&data_dir);

    let mut settings = Settings {
        data_dir,
        ..Settings::default()
    }
    .load(&store)
    .await
    .context("load stored settings")?
    .apply_env(env_lookup)?;

    if let Some(dir) = &global.data_dir {
        settings.data_dir = dir.clone();
    }
    if let Some(api_base) = &global.api_base {
        settings.api_base = api_base.clone();
    }
    if let Some(token) = &global.token {
        settings.api_token = Some(token.clone());
    }
    tracing::debug!(api_base = %settings.api_base, data_dir = %settings.data_dir.display(), "settings resolved");
    Ok(settings)
}

pub async fn run(command: SettingsCommand, settings: &Settings) -> anyhow::Result<()> {
    match command {
        SettingsCommand::Show => {
            let rendered = serde_json::to_string_pretty(settings).context("serialize settings")?;
            println!("{rendered}");
            println!("data_dir: {}", settings.data_dir.display());
            println!(
                "api_token: {}",
                if settings.api_token.is_some() { "set" } else { "unset" }
            );
        }
        SettingsCommand::Save => {
            let store = LocalFsKvStore::new(&settings.data_dir);
            settings.save(&store).await?;
            println!("saved to {}", settings.data_dir.display());
        }
    }
    Ok(())
}

fn parse_chapter_count(raw: &str) -> anyhow::Result<u32> {
    let count: u32 = raw
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("chapter count must be a positive integer, got {raw:?}"))?;
    if !(1..=20).contains(&count) {
        anyhow::bail!("chapter count must be between 1 and 20, got {count}");
    }
    Ok(count)
}
