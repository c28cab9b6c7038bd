use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::UpstreamError;
use crate::llm::truncate_chars;

/// Longest post excerpt forwarded into the image prompt
const MAX_POST_EXCERPT_CHARS: usize = 1000;

/// Text-to-image generation.
#[async_trait::async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate one image and return it as base64-encoded PNG data.
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError>;
}

/// Build the natural-language prompt for an illustration of the post.
pub fn build_image_prompt(post: &str, platform: &str, topic: &str) -> String {
    format!(
        "Create a realistic, high-quality illustrative image for a {} post about \"{}\". \
The image should fit the style of {} and reflect the theme of this post. \
Do not render any text in the image.\n\nPOST:\n{}",
        platform,
        topic,
        platform,
        truncate_chars(post.trim(), MAX_POST_EXCERPT_CHARS)
    )
}

/// Wrap base64 PNG data in a data URI.
pub fn to_data_uri(b64_png: &str) -> String {
    format!("data:image/png;base64,{}", b64_png)
}

/// Client for OpenAI/Together-style `images/generations` endpoints.
pub struct RemoteImageGenerator {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    width: u32,
    height: u32,
    steps: u32,
    timeout: Duration,
}

impl RemoteImageGenerator {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            width: 1024,
            height: 768,
            steps: 4,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(cfg: &common::ImageConfig, api_key: impl Into<String>) -> Self {
        let mut generator = Self::new(&cfg.api_url, api_key, &cfg.model);
        generator.width = cfg.width;
        generator.height = cfg.height;
        generator.steps = cfg.steps;
        generator.timeout = Duration::from_secs(cfg.timeout_seconds);
        generator
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl ImageGenerator for RemoteImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError> {
        let req_body = ImageRequest {
            model: &self.model,
            prompt,
            width: self.width,
            height: self.height,
            steps: self.steps,
            n: 1,
            response_format: "b64_json",
        };

        debug!(model = %self.model, width = self.width, height = self.height, steps = self.steps, "requesting image");

        let call = async {
            let response = self
                .client
                .post(&self.api_url)
                .bearer_auth(&self.api_key)
                .json(&req_body)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(UpstreamError::from_response(response).await);
            }

            let body = response.text().await?;
            serde_json::from_str::<ImageResponse>(&body)
                .map_err(|e| UpstreamError::Malformed(format!("image body: {}", e)))
        };

        let body = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| UpstreamError::Timeout(self.timeout))??;

        body.data
            .into_iter()
            .find_map(|d| d.b64_json.filter(|s| !s.is_empty()))
            .ok_or_else(|| UpstreamError::Malformed("image response has no b64_json data".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    width: u32,
    height: u32,
    steps: u32,
    n: u32,
    response_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}
