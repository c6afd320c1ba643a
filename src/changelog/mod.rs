//! Changelog feed: commit history fetched from GitHub, classified, grouped by
//! day, and cached locally for an hour.

pub mod classify;
pub mod feed;
pub mod github;

use std::sync::Arc;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cli::{ChangelogArgs, ClassifyArgs};
use crate::config::Settings;
use crate::store::{self, KvStore, LocalFsKvStore};

pub use classify::{Classification, CommitType, classify};
pub use feed::{CommitAuthor, CommitEntry, DayGroup, group_by_day};
pub use github::{CommitSource, GitHubCommitSource};

pub const CACHE_KEY: &str = "changelog_cache";
pub const LAST_FETCH_KEY: &str = "changelog_last_fetch";
pub const DEFAULT_PER_PAGE: u32 = 30;

pub fn freshness_window() -> chrono::Duration {
    chrono::Duration::hours(1)
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangelogPage {
    pub entries: Vec<CommitEntry>,
    /// Served from the local cache without a network call.
    pub cached: bool,
    pub fetched_at: Option<DateTime<Utc>>,
    /// The caller may refresh in the background (see [`Changelog::spawn_revalidation`]).
    pub revalidate: bool,
}

#[derive(Clone)]
pub struct Changelog {
    source: Arc<dyn CommitSource>,
    store: Arc<dyn KvStore>,
    per_page: u32,
}

impl Changelog {
    pub fn new(source: Arc<dyn CommitSource>, store: Arc<dyn KvStore>) -> Self {
        Self {
            source,
            store,
            per_page: DEFAULT_PER_PAGE,
        }
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.clamp(1, 100);
        self
    }

    /// First page of the feed. A cache younger than the freshness window is
    /// served as is; otherwise the page is fetched and the cache rewritten.
    /// A timestamp in the future counts as stale.
    pub async fn load(&self, now: DateTime<Utc>) -> anyhow::Result<ChangelogPage> {
        if let Some((entries, fetched_at)) = self.read_cache().await? {
            let age = now.signed_duration_since(fetched_at);
            if age >= chrono::Duration::zero() && age < freshness_window() {
                tracing::debug!(age_secs = age.num_seconds(), "serving cached changelog");
                return Ok(ChangelogPage {
                    entries,
                    cached: true,
                    fetched_at: Some(fetched_at),
                    revalidate: true,
                });
            }
            tracing::info!(age_secs = age.num_seconds(), "changelog cache is stale");
        }
        self.fetch_and_cache(now).await
    }

    /// Later pages are never cached.
    pub async fn page(&self, page: u32, now: DateTime<Utc>) -> anyhow::Result<ChangelogPage> {
        if page <= 1 {
            return self.load(now).await;
        }
        let records = self.source.fetch_page(page, self.per_page).await?;
        Ok(ChangelogPage {
            entries: feed::entries_from_raw(records),
            cached: false,
            fetched_at: None,
            revalidate: false,
        })
    }

    /// Drops the cache and fetches page one again.
    pub async fn refresh(&self, now: DateTime<Utc>) -> anyhow::Result<ChangelogPage> {
        self.store.remove(CACHE_KEY).await?;
        self.store.remove(LAST_FETCH_KEY).await?;
        self.fetch_and_cache(now).await
    }

    pub fn spawn_revalidation(&self) -> tokio::task::JoinHandle<Option<usize>> {
        let changelog = self.clone();
        tokio::spawn(async move {
            match changelog.fetch_and_cache(Utc::now()).await {
                Ok(page) => Some(page.entries.len()),
                Err(err) => {
                    tracing::warn!(error = %format!("{err:#}"), "background changelog refresh failed");
                    None
                }
            }
        })
    }

    async fn fetch_and_cache(&self, now: DateTime<Utc>) -> anyhow::Result<ChangelogPage> {
        let records = self
            .source
            .fetch_page(1, self.per_page)
            .await
            .context("fetch changelog")?;
        let entries = feed::entries_from_raw(records);
        store::save(self.store.as_ref(), CACHE_KEY, &entries).await?;
        store::save(self.store.as_ref(), LAST_FETCH_KEY, &now.to_rfc3339()).await?;
        tracing::info!(entries = entries.len(), "changelog cached");
        Ok(ChangelogPage {
            entries,
            cached: false,
            fetched_at: Some(now),
            revalidate: false,
        })
    }

    async fn read_cache(&self) -> anyhow::Result<Option<(Vec<CommitEntry>, DateTime<Utc>)>> {
        let store = self.store.as_ref();
        let raw_time = match store::load::<String>(store, LAST_FETCH_KEY).await {
            Ok(Some(raw_time)) => raw_time,
            Ok(None) => return Ok(None),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "ignoring unreadable changelog timestamp");
                return Ok(None);
            }
        };
        let fetched_at = match DateTime::parse_from_rfc3339(&raw_time) {
            Ok(time) => time.with_timezone(&Utc),
            Err(err) => {
                tracing::warn!(%raw_time, error = %err, "ignoring unreadable changelog timestamp");
                return Ok(None);
            }
        };
        let entries = match store::load::<Vec<CommitEntry>>(store, CACHE_KEY).await {
            Ok(Some(entries)) => entries,
            Ok(None) => return Ok(None),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "ignoring unreadable changelog cache");
                return Ok(None);
            }
        };
        Ok(Some((entries, fetched_at)))
    }
}

pub async fn run(args: ChangelogArgs, settings: &Settings) -> anyhow::Result<()> {
    let source = GitHubCommitSource::new(
        &settings.github_api_base,
        &settings.changelog_owner,
        &settings.changelog_repo,
    )?
    .with_author(settings.changelog_author.clone());
    let store = LocalFsKvStore::new(&settings.data_dir);
    let changelog = Changelog::new(Arc::new(source), Arc::new(store));

    let now = Utc::now();
    let page = if args.refresh {
        changelog.refresh(now).await?
    } else {
        changelog.page(args.page, now).await?
    };

    if args.json {
        let rendered = serde_json::to_string_pretty(&page).context("serialize changelog")?;
        println!("{rendered}");
        return Ok(());
    }

    for group in group_by_day(&page.entries) {
        println!("{}", group.day);
        for entry in &group.entries {
            let scope = entry
                .scope
                .as_deref()
                .map(|s| format!("({s})"))
                .unwrap_or_default();
            println!("  {:<8} {scope} {}", entry.kind.as_str(), entry.message);
        }
    }
    if page.cached {
        eprintln!("(served from cache; use --refresh to fetch again)");
    }
    Ok(())
}

pub fn print_classification(args: ClassifyArgs) -> anyhow::Result<()> {
    let classification = classify(&args.message);
    if args.json {
        let rendered =
            serde_json::to_string(&classification).context("serialize classification")?;
        println!("{rendered}");
        return Ok(());
    }
    match &classification.scope {
        Some(scope) => println!(
            "{}({scope}): {}",
            classification.kind, classification.clean_message
        ),
        None => println!("{}: {}", classification.kind, classification.clean_message),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::store::LocalFsKvStore;

    #[derive(Default)]
    struct CountingSource {
        pages: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl CommitSource for CountingSource {
        async fn fetch_page(
            &self,
            page: u32,
            _per_page: u32,
        ) -> anyhow::Result<Vec<serde_json::Value>> {
            self.pages.lock().unwrap().push(page);
            Ok(vec![json!({
                "sha": format!("sha-{page}"),
                "commit": {
                    "author": {"name": "Mu", "email": "m@x", "date": "2025-05-01T10:00:00Z"},
                    "message": "fix: 修复保存",
                },
                "html_url": "https://github.com/o/r/commit/1",
                "author": null,
            })])
        }
    }

    fn fixture() -> anyhow::Result<(tempfile::TempDir, Arc<CountingSource>, Changelog)> {
        let dir = tempfile::tempdir()?;
        let source = Arc::new(CountingSource::default());
        let store = Arc::new(LocalFsKvStore::new(dir.path()));
        let changelog = Changelog::new(source.clone(), store);
        Ok((dir, source, changelog))
    }

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    #[tokio::test]
    async fn fresh_cache_is_served_without_fetching() -> anyhow::Result<()> {
        let (_dir, source, changelog) = fixture()?;
        let fetched = at("2025-05-01T12:00:00Z");

        let first = changelog.load(fetched).await?;
        assert!(!first.cached);
        assert_eq!(source.pages.lock().unwrap().len(), 1);

        let later = changelog.load(fetched + chrono::Duration::minutes(30)).await?;
        assert!(later.cached);
        assert!(later.revalidate);
        assert_eq!(later.entries, first.entries);
        assert_eq!(source.pages.lock().unwrap().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn stale_cache_is_refetched() -> anyhow::Result<()> {
        let (_dir, source, changelog) = fixture()?;
        let fetched = at("2025-05-01T12:00:00Z");
        changelog.load(fetched).await?;

        let later = changelog.load(fetched + chrono::Duration::minutes(90)).await?;
        assert!(!later.cached);
        assert_eq!(later.fetched_at, Some(fetched + chrono::Duration::minutes(90)));
        assert_eq!(*source.pages.lock().unwrap(), vec![1, 1]);
        Ok(())
    }

    #[tokio::test]
    async fn later_pages_bypass_cache_and_refresh_refetches() -> anyhow::Result<()> {
        let (_dir, source, changelog) = fixture()?;
        let now = at("2025-05-01T12:00:00Z");

        let second = changelog.page(2, now).await?;
        assert!(!second.cached);
        assert_eq!(second.entries[0].id, "sha-2");
        assert_eq!(second.entries[0].kind, CommitType::Fix);

        changelog.load(now).await?;
        let refreshed = changelog.refresh(now).await?;
        assert!(!refreshed.cached);
        assert_eq!(*source.pages.lock().unwrap(), vec![2, 1, 1]);
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_timestamp_counts_as_missing_cache() -> anyhow::Result<()> {
        let (dir, source, changelog) = fixture()?;
        let now = at("2025-05-01T12:00:00Z");
        changelog.load(now).await?;

        let timestamp = dir.path().join("kv").join(format!("{LAST_FETCH_KEY}.json"));
        for garbage in ["{truncated", "1714560000"] {
            std::fs::write(&timestamp, garbage)?;
            let page = changelog.load(now).await?;
            assert!(!page.cached, "{garbage} should force a refetch");
            assert_eq!(page.fetched_at, Some(now));
        }
        assert_eq!(*source.pages.lock().unwrap(), vec![1, 1, 1]);

        let page = changelog.load(now).await?;
        assert!(page.cached);
        Ok(())
    }

    #[tokio::test]
    async fn future_timestamp_is_stale() -> anyhow::Result<()> {
        let (_dir, source, changelog) = fixture()?;
        let fetched = at("2025-05-01T12:00:00Z");
        changelog.load(fetched).await?;

        let earlier = changelog.load(fetched - chrono::Duration::hours(3)).await?;
        assert!(!earlier.cached);
        assert_eq!(*source.pages.lock().unwrap(), vec![1, 1]);
        Ok(())
    }

    #[tokio::test]
    async fn background_revalidation_rewrites_cache() -> anyhow::Result<()> {
        let (_dir, source, changelog) = fixture()?;
        let count = changelog.spawn_revalidation().await?;
        assert_eq!(count, Some(1));
        assert_eq!(source.pages.lock().unwrap().len(), 1);

        let page = changelog.load(Utc::now()).await?;
        assert!(page.cached);
        Ok(())
    }
}
