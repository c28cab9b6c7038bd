#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use socialscope::discovery::{ArticleReference, NewsSearch};
use socialscope::error::UpstreamError;
use socialscope::image::ImageGenerator;
use socialscope::llm::{LlmProvider, LlmRequest, LlmResponse, UsageMetadata};
use socialscope::pipeline::{Pipeline, PipelineSettings};
use socialscope::scraping::ContentExtractor;

pub const SUMMARY_MARKER: &str = "10 most important points";

pub const COMPLIANT_POST: &str = "EVs Go Mainstream\n\nElectric vehicles hit record sales this quarter (EV sales hit record, https://one.example.com/ev).\n\n#ElectricVehicles #EV #CleanEnergy #Sustainability #FutureOfMobility";

pub fn upstream_500() -> UpstreamError {
    UpstreamError::Status {
        status: 500,
        body: "internal upstream detail with key sk-secret".to_string(),
    }
}

pub fn sample_articles() -> Vec<ArticleReference> {
    vec![
        ArticleReference::new("EV sales hit record", "https://one.example.com/ev"),
        ArticleReference::new("Battery prices fall", "https://two.example.com/batteries"),
        ArticleReference::new("Charging networks grow", "https://three.example.com/charging"),
    ]
}

/// News search returning a fixed list (truncated to the requested count) or failing.
pub struct FakeNews {
    articles: Option<Vec<ArticleReference>>,
    pub calls: Mutex<Vec<(String, usize)>>,
}

impl FakeNews {
    pub fn returning(articles: Vec<ArticleReference>) -> Self {
        Self {
            articles: Some(articles),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            articles: None,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl NewsSearch for FakeNews {
    async fn search(&self, topic: &str, count: usize) -> Result<Vec<ArticleReference>, UpstreamError> {
        self.calls.lock().unwrap().push((topic.to_string(), count));
        match &self.articles {
            Some(articles) => Ok(articles.iter().take(count).cloned().collect()),
            None => Err(upstream_500()),
        }
    }
}

/// Extractor serving canned page text; unknown URLs fail with 404.
pub struct FakeExtractor {
    pages: HashMap<String, String>,
}

impl FakeExtractor {
    pub fn with_pages(pages: &[(&str, &str)]) -> Self {
        Self {
            pages: pages.iter().map(|(u, t)| (u.to_string(), t.to_string())).collect(),
        }
    }

    pub fn empty() -> Self {
        Self::with_pages(&[])
    }
}

#[async_trait::async_trait]
impl ContentExtractor for FakeExtractor {
    async fn extract(&self, url: &str) -> Result<String, UpstreamError> {
        self.pages.get(url).cloned().ok_or(UpstreamError::Status {
            status: 404,
            body: "not found".to_string(),
        })
    }
}

/// LLM answering summarization prompts with a fixed summary and post prompts
/// from a queue (the last post is repeated once the queue is drained).
pub struct FakeLlm {
    summary: Option<String>,
    posts: Mutex<VecDeque<String>>,
    last_post: Mutex<Option<String>>,
    pub prompts: Mutex<Vec<LlmRequest>>,
}

impl FakeLlm {
    pub fn new(summary: &str, posts: &[&str]) -> Self {
        Self {
            summary: Some(summary.to_string()),
            posts: Mutex::new(posts.iter().map(|p| p.to_string()).collect()),
            last_post: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_summaries(posts: &[&str]) -> Self {
        let mut llm = Self::new("", posts);
        llm.summary = None;
        llm
    }

    pub fn summary_requests(&self) -> Vec<LlmRequest> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.prompt.contains(SUMMARY_MARKER))
            .cloned()
            .collect()
    }

    pub fn post_requests(&self) -> Vec<LlmRequest> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.prompt.contains(SUMMARY_MARKER))
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl LlmProvider for FakeLlm {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, UpstreamError> {
        let is_summary = request.prompt.contains(SUMMARY_MARKER);
        self.prompts.lock().unwrap().push(request);

        let content = if is_summary {
            self.summary.clone().ok_or_else(upstream_500)?
        } else {
            let next = self.posts.lock().unwrap().pop_front();
            let mut last = self.last_post.lock().unwrap();
            match next {
                Some(post) => {
                    *last = Some(post.clone());
                    post
                }
                None => last.clone().ok_or_else(upstream_500)?,
            }
        };

        Ok(LlmResponse {
            content,
            usage: UsageMetadata::default(),
            model: "fake".to_string(),
        })
    }
}

/// Image generator returning a fixed payload or failing with a 500.
pub struct FakeImages {
    payload: Option<String>,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeImages {
    pub fn returning(payload: &str) -> Self {
        Self {
            payload: Some(payload.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            payload: None,
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl ImageGenerator for FakeImages {
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.payload.clone().ok_or_else(upstream_500)
    }
}

pub fn pipeline(
    news: Arc<FakeNews>,
    extractor: Arc<FakeExtractor>,
    llm: Arc<FakeLlm>,
    images: Option<Arc<FakeImages>>,
    settings: PipelineSettings,
) -> Pipeline {
    Pipeline::new(
        news,
        extractor,
        llm,
        images.map(|i| i as Arc<dyn ImageGenerator>),
        settings,
    )
}
