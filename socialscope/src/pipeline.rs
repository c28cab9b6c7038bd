//! Request orchestration: discovery, per-article extraction and summarization
//! (fan-out / fan-in), post synthesis, and optional image synthesis.
//!
//! Failure policy per stage:
//! - discovery, post synthesis: abort the request
//! - extraction, image synthesis: absorbed (empty text / no image)
//! - summarization: `pipeline.summarization_failure` (abort by default)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use common::FailurePolicy;
use futures::future::join_all;
use tracing::{error, info, warn};

use crate::discovery::{ArticleReference, NewsApiClient, NewsSearch};
use crate::error::{PipelineError, Stage, StageError, UpstreamError};
use crate::image::{self, ImageGenerator, RemoteImageGenerator};
use crate::llm::remote::RemoteLlmProvider;
use crate::llm::{summarizer, GenerationParams, LlmProvider};
use crate::scraping::{ArticleScraper, ContentExtractor};
use crate::synthesis::{self, ArticleWithSummary, PostRules};

/// Validated input for one generation request.
#[derive(Debug, Clone)]
pub struct PostRequest {
    pub topic: String,
    pub platform: String,
    pub include_image: bool,
    /// Overrides the configured article count
    pub article_count: Option<usize>,
}

impl PostRequest {
    /// Trim and check caller input. `article_count`, when given, must be in
    /// `1..=max_article_count`.
    pub fn validated(
        topic: &str,
        platform: &str,
        include_image: bool,
        article_count: Option<usize>,
        max_article_count: usize,
    ) -> Result<Self, String> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err("topic must not be empty".to_string());
        }
        let platform = platform.trim();
        if platform.is_empty() {
            return Err("platform must not be empty".to_string());
        }
        if let Some(count) = article_count {
            if count == 0 || count > max_article_count {
                return Err(format!("articleCount must be between 1 and {}", max_article_count));
            }
        }

        Ok(Self {
            topic: topic.to_string(),
            platform: platform.to_string(),
            include_image,
            article_count,
        })
    }
}

/// Final output of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedPost {
    pub text: String,
    pub image_data_uri: Option<String>,
}

/// Tunables derived from the config file.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub article_count: usize,
    pub max_article_count: usize,
    pub summarization: GenerationParams,
    pub synthesis: GenerationParams,
    pub summarization_failure: FailurePolicy,
    pub post_rules: PostRules,
    pub request_timeout: Duration,
}

impl PipelineSettings {
    pub fn from_config(cfg: &common::Config) -> Self {
        Self {
            article_count: cfg.news.page_size,
            max_article_count: cfg.pipeline.max_article_count,
            summarization: GenerationParams::from(&cfg.llm.summarization),
            synthesis: GenerationParams::from(&cfg.llm.synthesis),
            summarization_failure: cfg.pipeline.summarization_failure,
            post_rules: PostRules {
                min_hashtags: cfg.pipeline.min_hashtags,
                attempts: cfg.pipeline.post_attempts,
            },
            request_timeout: Duration::from_secs(cfg.pipeline.request_timeout_seconds),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&common::Config::default())
    }
}

/// The external collaborators plus settings, shared by every request.
pub struct Pipeline {
    news: Arc<dyn NewsSearch>,
    extractor: Arc<dyn ContentExtractor>,
    llm: Arc<dyn LlmProvider>,
    images: Option<Arc<dyn ImageGenerator>>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        news: Arc<dyn NewsSearch>,
        extractor: Arc<dyn ContentExtractor>,
        llm: Arc<dyn LlmProvider>,
        images: Option<Arc<dyn ImageGenerator>>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            news,
            extractor,
            llm,
            images,
            settings,
        }
    }

    /// Build the production pipeline: resolve credentials and construct the HTTP clients.
    ///
    /// News and LLM credentials are required. A missing image credential only
    /// disables image synthesis.
    pub fn from_config(cfg: &common::Config) -> anyhow::Result<Self> {
        let news_key = common::resolve_api_key(&cfg.news.api_key_env).context("news search credentials")?;
        let llm_key = common::resolve_api_key(&cfg.llm.remote.api_key_env).context("LLM credentials")?;

        let news = NewsApiClient::from_config(&cfg.news, news_key);
        let extractor = ArticleScraper::new(&cfg.scraping).context("failed to build article scraper")?;
        let llm = RemoteLlmProvider::from_config(&cfg.llm.remote, llm_key);
        info!("LLM provider initialized: remote ({}) at {}", llm.model(), cfg.llm.remote.api_url);

        let images: Option<Arc<dyn ImageGenerator>> = if !cfg.image.enabled {
            info!("image generation disabled in configuration");
            None
        } else {
            match common::resolve_api_key(&cfg.image.api_key_env) {
                Ok(key) => {
                    info!("image generator initialized: {} at {}", cfg.image.model, cfg.image.api_url);
                    Some(Arc::new(RemoteImageGenerator::from_config(&cfg.image, key)))
                }
                Err(e) => {
                    warn!("image generation disabled: {:#}", e);
                    None
                }
            }
        };

        Ok(Self::new(
            Arc::new(news),
            Arc::new(extractor),
            Arc::new(llm),
            images,
            PipelineSettings::from_config(cfg),
        ))
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn image_generation_enabled(&self) -> bool {
        self.images.is_some()
    }

    /// Run the whole pipeline under the request deadline.
    pub async fn generate(&self, request: &PostRequest) -> Result<GeneratedPost, PipelineError> {
        let deadline = self.settings.request_timeout;
        match tokio::time::timeout(deadline, self.run(request)).await {
            Ok(result) => result,
            Err(_) => {
                error!(topic = %request.topic, "request deadline of {:?} exceeded", deadline);
                Err(PipelineError::DeadlineExceeded(deadline))
            }
        }
    }

    async fn run(&self, request: &PostRequest) -> Result<GeneratedPost, PipelineError> {
        let count = request.article_count.unwrap_or(self.settings.article_count);

        let articles = self
            .news
            .search(&request.topic, count)
            .await
            .map_err(|e| log_failure(Stage::Discovery, e))?;
        info!(stage = %Stage::Discovery, count = articles.len(), "articles discovered");

        let summarized = self.summarize_all(articles).await?;

        let text = self.synthesize(request, &summarized).await?;

        let image_data_uri = if request.include_image {
            self.illustrate(&text, request).await
        } else {
            None
        };

        Ok(GeneratedPost { text, image_data_uri })
    }

    /// Fan out extraction + summarization over every article and join.
    async fn summarize_all(&self, articles: Vec<ArticleReference>) -> Result<Vec<ArticleWithSummary>, StageError> {
        let results = join_all(articles.into_iter().map(|article| self.summarize_one(article))).await;
        results.into_iter().collect()
    }

    async fn summarize_one(&self, article: ArticleReference) -> Result<ArticleWithSummary, StageError> {
        let text = match self.extractor.extract(&article.url).await {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    stage = %Stage::Extraction,
                    url = %article.url,
                    status = ?e.status(),
                    "extraction failed, continuing with empty text: {}",
                    e
                );
                String::new()
            }
        };

        let summary = match summarizer::summarize_article(self.llm.as_ref(), &text, &self.settings.summarization).await {
            Ok(summary) => summary,
            Err(e) => match self.settings.summarization_failure {
                FailurePolicy::Abort => return Err(log_failure(Stage::Summarization, e)),
                FailurePolicy::Absorb => {
                    warn!(
                        stage = %Stage::Summarization,
                        url = %article.url,
                        status = ?e.status(),
                        "summarization failed, continuing with empty summary: {}",
                        e
                    );
                    String::new()
                }
            },
        };

        Ok(ArticleWithSummary { article, summary })
    }

    async fn synthesize(&self, request: &PostRequest, articles: &[ArticleWithSummary]) -> Result<String, StageError> {
        let rules = &self.settings.post_rules;
        let prompt = synthesis::build_post_prompt(&request.platform, &request.topic, articles, rules.min_hashtags);

        synthesis::synthesize_post(
            self.llm.as_ref(),
            &prompt,
            &self.settings.synthesis,
            rules,
            &request.topic,
            &request.platform,
        )
        .await
        .map_err(|e| log_failure(Stage::PostSynthesis, e))
    }

    /// Failures here never fail the request.
    async fn illustrate(&self, post: &str, request: &PostRequest) -> Option<String> {
        let Some(generator) = &self.images else {
            warn!(stage = %Stage::ImageSynthesis, "image requested but image generation is not configured");
            return None;
        };

        let prompt = image::build_image_prompt(post, &request.platform, &request.topic);
        match generator.generate(&prompt).await {
            Ok(b64) => {
                info!(stage = %Stage::ImageSynthesis, bytes = b64.len(), "image generated");
                Some(image::to_data_uri(&b64))
            }
            Err(e) => {
                warn!(
                    stage = %Stage::ImageSynthesis,
                    status = ?e.status(),
                    timeout = e.is_timeout(),
                    "image generation failed, returning post without image: {}",
                    e
                );
                None
            }
        }
    }
}

/// Log a request-fatal upstream failure with its detail and wrap it.
fn log_failure(stage: Stage, source: UpstreamError) -> StageError {
    error!(
        stage = %stage,
        status = ?source.status(),
        timeout = source.is_timeout(),
        "{} failed: {}",
        stage,
        source
    );
    StageError::new(stage, source)
}
