use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use url::Url;

/// Where commit records come from. One page is a JSON array of raw records.
#[async_trait]
pub trait CommitSource: Send + Sync {
    async fn fetch_page(&self, page: u32, per_page: u32) -> anyhow::Result<Vec<serde_json::Value>>;
}

pub const GITHUB_API_BASE: &str = "https://api.github.com";

#[derive(Debug, Clone)]
pub struct GitHubCommitSource {
    client: reqwest::Client,
    api_base: Url,
    owner: String,
    repo: String,
    author: Option<String>,
}

impl GitHubCommitSource {
    pub fn new(api_base: &str, owner: &str, repo: &str) -> anyhow::Result<Self> {
        let api_base = Url::parse(&format!("{}/", api_base.trim_end_matches('/')))
            .with_context(|| format!("invalid github api base: {api_base}"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("plotline/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            api_base,
            owner: owner.to_owned(),
            repo: repo.to_owned(),
            author: None,
        })
    }

    /// Restricts the feed to commits by one GitHub login.
    pub fn with_author(mut self, author: Option<String>) -> Self {
        self.author = author.filter(|a| !a.trim().is_empty());
        self
    }

    fn commits_url(&self, page: u32, per_page: u32) -> anyhow::Result<Url> {
        let mut url = self
            .api_base
            .join(&format!("repos/{}/{}/commits", self.owner, self.repo))
            .context("build commits url")?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(author) = &self.author {
                query.append_pair("author", author);
            }
            query
                .append_pair("page", &page.to_string())
                .append_pair("per_page", &per_page.to_string());
        }
        Ok(url)
    }
}

#[async_trait]
impl CommitSource for GitHubCommitSource {
    async fn fetch_page(&self, page: u32, per_page: u32) -> anyhow::Result<Vec<serde_json::Value>> {
        let url = self.commits_url(page, per_page)?;
        tracing::info!(page, per_page, repo = %format!("{}/{}", self.owner, self.repo), "fetch commits");
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/vnd.github.v3+json")
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let status = response.status();
        let body = response.text().await.context("read commits response")?;
        if !status.is_success() {
            anyhow::bail!("github commits request failed ({status}): {body}");
        }
        serde_json::from_str(&body).context("parse commits response")
    }
}
