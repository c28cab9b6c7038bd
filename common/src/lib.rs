/*!
common/src/lib.rs

Shared configuration types and helpers for SocialScope.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader that layers an override file on top of a default file
- Credential lookup from the process environment
*/

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// HTTP server section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// News search service (NewsAPI-compatible)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsConfig {
    pub api_url: String,
    pub api_key_env: String,
    /// Number of articles requested when the caller does not ask for a count
    pub page_size: usize,
    pub language: Option<String>,
    pub sort_by: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            api_url: "https://newsapi.org/v2/everything".to_string(),
            api_key_env: "NEWS_API_KEY".to_string(),
            page_size: 3,
            language: Some("en".to_string()),
            sort_by: Some("publishedAt".to_string()),
            timeout_seconds: 15,
        }
    }
}

/// Article page fetching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapingConfig {
    pub timeout_seconds: u64,
    pub max_response_bytes: usize,
    pub user_agent: String,
    /// Permit fetching loopback/private addresses. Only meant for local testing.
    pub allow_private_hosts: bool,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            max_response_bytes: 2 * 1024 * 1024,
            user_agent: "SocialScope/0.1.0".to_string(),
            allow_private_hosts: false,
        }
    }
}

/// Remote chat-completion endpoint (OpenAI-compatible)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteLlmConfig {
    pub api_url: String,
    pub api_key_env: String,
    pub model: String,
    pub timeout_seconds: u64,
}

impl Default for RemoteLlmConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_seconds: 60,
        }
    }
}

/// Sampling parameters for one kind of LLM task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_tokens: usize,
    /// Upper bound on the input text forwarded to the model (characters)
    #[serde(default)]
    pub max_input_chars: Option<usize>,
}

impl GenerationConfig {
    pub fn summarization() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 500,
            max_input_chars: Some(12_000),
        }
    }

    pub fn synthesis() -> Self {
        Self {
            temperature: 0.8,
            max_tokens: 1000,
            max_input_chars: None,
        }
    }
}

fn default_summarization() -> GenerationConfig {
    GenerationConfig::summarization()
}

fn default_synthesis() -> GenerationConfig {
    GenerationConfig::synthesis()
}

/// LLM top-level config: one endpoint, task-specific sampling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub remote: RemoteLlmConfig,
    #[serde(default = "default_summarization")]
    pub summarization: GenerationConfig,
    #[serde(default = "default_synthesis")]
    pub synthesis: GenerationConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            remote: RemoteLlmConfig::default(),
            summarization: GenerationConfig::summarization(),
            synthesis: GenerationConfig::synthesis(),
        }
    }
}

/// Text-to-image service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub enabled: bool,
    pub api_url: String,
    pub api_key_env: String,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub timeout_seconds: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: "https://api.together.xyz/v1/images/generations".to_string(),
            api_key_env: "TOGETHER_API_KEY".to_string(),
            model: "black-forest-labs/FLUX.1-schnell-Free".to_string(),
            width: 1024,
            height: 768,
            steps: 4,
            timeout_seconds: 60,
        }
    }
}

/// What a stage does with an upstream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Fail the whole request
    Abort,
    /// Replace the stage output with an empty value and continue
    Absorb,
}

/// Orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub summarization_failure: FailurePolicy,
    pub min_hashtags: usize,
    /// Total post-synthesis calls allowed when the model output is non-compliant
    pub post_attempts: usize,
    pub max_article_count: usize,
    pub request_timeout_seconds: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            summarization_failure: FailurePolicy::Abort,
            min_hashtags: 5,
            post_attempts: 2,
            max_article_count: 10,
            request_timeout_seconds: 180,
        }
    }
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub news: NewsConfig,
    pub scraping: ScrapingConfig,
    pub llm: LlmConfig,
    pub image: ImageConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse config: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would only fail later, at request time.
    pub fn validate(&self) -> Result<()> {
        let endpoints = [
            ("news.api_url", &self.news.api_url),
            ("llm.remote.api_url", &self.llm.remote.api_url),
            ("image.api_url", &self.image.api_url),
        ];
        for (key, value) in endpoints {
            let parsed = url::Url::parse(value).with_context(|| format!("{} is not a valid URL: {}", key, value))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                bail!("{} must be an http(s) URL: {}", key, value);
            }
        }

        if self.news.page_size == 0 {
            bail!("news.page_size must be at least 1");
        }
        if self.news.page_size > self.pipeline.max_article_count {
            bail!(
                "news.page_size ({}) exceeds pipeline.max_article_count ({})",
                self.news.page_size,
                self.pipeline.max_article_count
            );
        }
        if self.pipeline.post_attempts == 0 {
            bail!("pipeline.post_attempts must be at least 1");
        }
        Ok(())
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Read an API credential from the environment variable named in the config.
/// Empty values count as missing.
pub fn resolve_api_key(env_name: &str) -> Result<String> {
    let value = std::env::var(env_name).with_context(|| format!("API key env var '{}' not set", env_name))?;
    if value.trim().is_empty() {
        bail!("API key env var '{}' is empty", env_name);
    }
    Ok(value)
}
