use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::EncyclopediaSource;

const USER_AGENT: &str = "naturequiz-ai/0.1 (species explanation generator)";

/// Wikipedia REST `page/summary` client. `{lang}` in the base URL is replaced
/// with the requested language.
pub struct WikipediaClient {
    client: reqwest::Client,
    base_url: String,
}

impl WikipediaClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn from_env(timeout: Duration) -> Result<Self> {
        let base_url = dotenv::var("WIKIPEDIA_BASE_URL")
            .unwrap_or_else(|_| "https://{lang}.wikipedia.org".to_string());
        Self::new(base_url, timeout)
    }

    fn summary_url(&self, title: &str, lang: &str) -> Result<reqwest::Url> {
        let base = self.base_url.replace("{lang}", lang);
        let mut url = reqwest::Url::parse(base.trim_end_matches('/'))
            .with_context(|| format!("Invalid Wikipedia base URL: {}", base))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Wikipedia base URL cannot carry a path: {}", base))?
            .pop_if_empty()
            .extend(["api", "rest_v1", "page", "summary"])
            .push(&title.trim().replace(' ', "_"));
        Ok(url)
    }
}

/// Plain-text summary from a `page/summary` response body, if it is usable.
pub fn summary_text(json: &serde_json::Value) -> Option<String> {
    if json["type"].as_str() == Some("disambiguation") {
        return None;
    }
    let text = match json["extract"].as_str().filter(|s| !s.trim().is_empty()) {
        Some(extract) => extract.to_string(),
        None => {
            let html = json["extract_html"].as_str()?;
            html2text::from_read(html.as_bytes(), 10_000).ok()?
        }
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[async_trait]
impl EncyclopediaSource for WikipediaClient {
    fn label(&self, lang: &str) -> String {
        format!("Wikipedia ({})", lang)
    }

    async fn summary(&self, title: &str, lang: &str) -> Result<Option<String>> {
        let url = self.summary_url(title, lang)?;
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .context("Wikipedia request failed")?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(%url, "no Wikipedia page");
            return Ok(None);
        }
        let resp = resp.error_for_status().context("Wikipedia returned an error")?;
        let json: serde_json::Value = resp
            .json()
            .await
            .context("Failed to parse Wikipedia JSON")?;
        Ok(summary_text(&json))
    }
}
