use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use url::Url;

use crate::model::{
    BatchExpandRequest, BatchExpansionResult, ChapterPlan, CreateChaptersRequest, CreatedChapter,
    CreatedChapters, ExpandOutlineRequest, ExpansionResult, Outline, OutlineChapters, OutlineList,
    SingleChapterResponse,
};
use crate::sse::{self, EventStream};

/// Backend operations the expansion workflow depends on.
#[async_trait]
pub trait NovelApi: Send + Sync {
    async fn list_outlines(&self, project_id: &str) -> anyhow::Result<Vec<Outline>>;

    async fn outline_chapters(&self, outline_id: &str) -> anyhow::Result<OutlineChapters>;

    async fn expand_outline(
        &self,
        outline_id: &str,
        request: &ExpandOutlineRequest,
    ) -> anyhow::Result<EventStream<ExpansionResult>>;

    async fn batch_expand(
        &self,
        request: &BatchExpandRequest,
    ) -> anyhow::Result<EventStream<BatchExpansionResult>>;

    async fn create_chapters_from_plans(
        &self,
        outline_id: &str,
        plans: &[ChapterPlan],
    ) -> anyhow::Result<CreatedChapters>;

    /// One-to-one mode: the outline itself becomes a single chapter. The
    /// backend rejects outlines whose chapter already exists.
    async fn create_single_chapter(&self, outline_id: &str) -> anyhow::Result<CreatedChapter>;

    async fn delete_chapter(&self, chapter_id: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct HttpNovelApi {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpNovelApi {
    pub fn new(base_url: &str, token: Option<String>) -> anyhow::Result<Self> {
        // A trailing slash makes `Url::join` append instead of replacing the last segment.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url =
            Url::parse(&normalized).with_context(|| format!("invalid api base url: {base_url}"))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            anyhow::bail!("api base url must be http/https: {base_url}");
        }

        // No overall timeout: expansion streams stay open for minutes.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("build http client")?;

        Ok(Self {
            client,
            base_url,
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    fn endpoint(&self, path: &str) -> anyhow::Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("build endpoint url: {path}"))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> anyhow::Result<T> {
        let status = response.status();
        let raw = response
            .text()
            .await
            .with_context(|| format!("read {what} response body"))?;
        if !status.is_success() {
            let message = error_detail(&raw).unwrap_or(raw);
            anyhow::bail!("{what} failed ({status}): {message}");
        }
        serde_json::from_str(&raw).with_context(|| format!("parse {what} response"))
    }
}

#[async_trait]
impl NovelApi for HttpNovelApi {
    async fn list_outlines(&self, project_id: &str) -> anyhow::Result<Vec<Outline>> {
        let url = self.endpoint(&format!("outlines/project/{project_id}"))?;
        let response = self
            .authorized(self.client.get(url.clone()))
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let list: OutlineList = Self::read_json(response, "list outlines").await?;
        tracing::debug!(project_id, total = list.total, "listed outlines");
        Ok(list.items)
    }

    async fn outline_chapters(&self, outline_id: &str) -> anyhow::Result<OutlineChapters> {
        let url = self.endpoint(&format!("outlines/{outline_id}/chapters"))?;
        let response = self
            .authorized(self.client.get(url.clone()))
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        Self::read_json(response, "outline chapters").await
    }

    async fn expand_outline(
        &self,
        outline_id: &str,
        request: &ExpandOutlineRequest,
    ) -> anyhow::Result<EventStream<ExpansionResult>> {
        let url = self.endpoint(&format!("outlines/{outline_id}/expand-stream"))?;
        sse::post_event_stream(&self.client, url.as_str(), self.token.as_deref(), request).await
    }

    async fn batch_expand(
        &self,
        request: &BatchExpandRequest,
    ) -> anyhow::Result<EventStream<BatchExpansionResult>> {
        let url = self.endpoint("outlines/batch-expand-stream")?;
        sse::post_event_stream(&self.client, url.as_str(), self.token.as_deref(), request).await
    }

    async fn create_chapters_from_plans(
        &self,
        outline_id: &str,
        plans: &[ChapterPlan],
    ) -> anyhow::Result<CreatedChapters> {
        let url = self.endpoint(&format!("outlines/{outline_id}/create-chapters-from-plans"))?;
        let body = CreateChaptersRequest {
            chapter_plans: plans,
        };
        let response = self
            .authorized(self.client.post(url.clone()).json(&body))
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;
        Self::read_json(response, "create chapters").await
    }

    async fn create_single_chapter(&self, outline_id: &str) -> anyhow::Result<CreatedChapter> {
        let url = self.endpoint(&format!("outlines/{outline_id}/create-single-chapter"))?;
        let response = self
            .authorized(self.client.post(url.clone()))
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;
        let created: SingleChapterResponse =
            Self::read_json(response, "create single chapter").await?;
        tracing::debug!(outline_id, message = %created.message, "created single chapter");
        Ok(created.chapter)
    }

    async fn delete_chapter(&self, chapter_id: &str) -> anyhow::Result<()> {
        let url = self.endpoint(&format!("chapters/{chapter_id}"))?;
        let response = self
            .authorized(self.client.delete(url.clone()))
            .send()
            .await
            .with_context(|| format!("DELETE {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let message = error_detail(&raw).unwrap_or(raw);
            anyhow::bail!("delete chapter {chapter_id} failed ({status}): {message}");
        }
        Ok(())
    }
}

/// Extracts the backend's error text from a JSON error body (`{"detail": ...}`).
pub(crate) fn error_detail(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let detail = value
        .get("detail")
        .or_else(|| value.get("error"))
        .or_else(|| value.get("message"))?;
    match detail {
        serde_json::Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_append_to_base_path() -> anyhow::Result<()> {
        let api = HttpNovelApi::new("http://localhost:8000/api", None)?;
        assert_eq!(
            api.endpoint("outlines/o1/chapters")?.as_str(),
            "http://localhost:8000/api/outlines/o1/chapters"
        );
        let api = HttpNovelApi::new("http://localhost:8000/api/", None)?;
        assert_eq!(
            api.endpoint("outlines/batch-expand-stream")?.as_str(),
            "http://localhost:8000/api/outlines/batch-expand-stream"
        );
        Ok(())
    }

    #[test]
    fn rejects_non_http_base() {
        let err = HttpNovelApi::new("ftp://example.com", None)
            .unwrap_err()
            .to_string();
        assert!(err.contains("http/https"));
    }

    #[test]
    fn error_detail_reads_fastapi_bodies() {
        assert_eq!(
            error_detail(r#"{"detail":"大纲不存在"}"#),
            Some("大纲不存在".to_owned())
        );
        assert_eq!(error_detail("plain text"), None);
    }
}
