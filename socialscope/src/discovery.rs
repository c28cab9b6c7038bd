use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::UpstreamError;

/// A news article found for a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleReference {
    pub title: String,
    pub url: String,
    pub source: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl ArticleReference {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            source: None,
            published_at: None,
        }
    }
}

/// Keyword search over a news index.
#[async_trait::async_trait]
pub trait NewsSearch: Send + Sync {
    /// Return at most `count` articles for `topic`, in the service's order.
    async fn search(&self, topic: &str, count: usize) -> Result<Vec<ArticleReference>, UpstreamError>;
}

/// Client for NewsAPI-style `/v2/everything` endpoints.
pub struct NewsApiClient {
    client: Client,
    api_url: String,
    api_key: String,
    language: Option<String>,
    sort_by: Option<String>,
    timeout: Duration,
}

impl NewsApiClient {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            language: None,
            sort_by: None,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn from_config(cfg: &common::NewsConfig, api_key: impl Into<String>) -> Self {
        let mut client = Self::new(&cfg.api_url, api_key);
        client.language = cfg.language.clone();
        client.sort_by = cfg.sort_by.clone();
        client.timeout = Duration::from_secs(cfg.timeout_seconds);
        client
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl NewsSearch for NewsApiClient {
    async fn search(&self, topic: &str, count: usize) -> Result<Vec<ArticleReference>, UpstreamError> {
        let page_size = count.to_string();
        let mut query: Vec<(&str, &str)> = vec![("q", topic), ("pageSize", page_size.as_str())];
        if let Some(language) = &self.language {
            query.push(("language", language.as_str()));
        }
        if let Some(sort_by) = &self.sort_by {
            query.push(("sortBy", sort_by.as_str()));
        }

        debug!(topic, count, "querying news search");

        let call = async {
            let response = self
                .client
                .get(&self.api_url)
                .header("X-Api-Key", &self.api_key)
                .query(&query)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(UpstreamError::from_response(response).await);
            }

            let body = response.text().await?;
            serde_json::from_str::<NewsApiResponse>(&body)
                .map_err(|e| UpstreamError::Malformed(format!("news search body: {}", e)))
        };

        let body = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| UpstreamError::Timeout(self.timeout))??;

        if body.status.as_deref() == Some("error") {
            return Err(UpstreamError::Malformed(format!(
                "news search error {}: {}",
                body.code.unwrap_or_default(),
                body.message.unwrap_or_default()
            )));
        }

        let total = body.articles.len();
        let articles: Vec<ArticleReference> = body
            .articles
            .into_iter()
            .filter_map(NewsApiArticle::into_reference)
            .take(count)
            .collect();

        info!("discovery: {} usable of {} returned articles for '{}'", articles.len(), total, topic);
        Ok(articles)
    }
}

#[derive(Debug, Deserialize)]
struct NewsApiResponse {
    status: Option<String>,
    code: Option<String>,
    message: Option<String>,
    #[serde(default)]
    articles: Vec<NewsApiArticle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsApiArticle {
    title: Option<String>,
    url: Option<String>,
    source: Option<NewsApiSource>,
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NewsApiSource {
    name: Option<String>,
}

impl NewsApiArticle {
    /// Drop entries that cannot be cited: no title, removed content, or a non-http(s) URL.
    fn into_reference(self) -> Option<ArticleReference> {
        let title = self.title?.trim().to_string();
        if title.is_empty() || title == "[Removed]" {
            return None;
        }

        let url = self.url?.trim().to_string();
        let parsed = url::Url::parse(&url).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return None;
        }

        let published_at = self
            .published_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Some(ArticleReference {
            title,
            url,
            source: self.source.and_then(|s| s.name).filter(|n| !n.is_empty()),
            published_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(title: Option<&str>, url: Option<&str>) -> NewsApiArticle {
        NewsApiArticle {
            title: title.map(String::from),
            url: url.map(String::from),
            source: Some(NewsApiSource {
                name: Some("Example Wire".to_string()),
            }),
            published_at: Some("2024-03-01T08:30:00Z".to_string()),
        }
    }

    #[test]
    fn keeps_complete_articles() {
        let article = raw(Some(" EV sales climb "), Some("https://example.com/ev"))
            .into_reference()
            .expect("usable article");
        assert_eq!(article.title, "EV sales climb");
        assert_eq!(article.url, "https://example.com/ev");
        assert_eq!(article.source.as_deref(), Some("Example Wire"));
        assert_eq!(
            article.published_at.map(|d| d.to_rfc3339()),
            Some("2024-03-01T08:30:00+00:00".to_string())
        );
    }

    #[test]
    fn drops_unusable_articles() {
        assert!(raw(None, Some("https://example.com")).into_reference().is_none());
        assert!(raw(Some("   "), Some("https://example.com")).into_reference().is_none());
        assert!(raw(Some("[Removed]"), Some("https://removed.com")).into_reference().is_none());
        assert!(raw(Some("Title"), None).into_reference().is_none());
        assert!(raw(Some("Title"), Some("not a url")).into_reference().is_none());
        assert!(raw(Some("Title"), Some("ftp://example.com/file")).into_reference().is_none());
    }

    #[test]
    fn tolerates_bad_dates() {
        let mut article = raw(Some("Title"), Some("https://example.com/a"));
        article.published_at = Some("yesterday".to_string());
        let article = article.into_reference().expect("usable article");
        assert!(article.published_at.is_none());
    }
}
