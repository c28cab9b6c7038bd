use serde::{Deserialize, Serialize};

use crate::error::UpstreamError;

/// Core trait for chat-completion providers
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate completion for a single-turn prompt
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, UpstreamError>;
}

/// Request structure for LLM generation
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompt: String,
    /// Left to the provider's default when unset
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

/// Response from LLM generation
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: UsageMetadata,
    pub model: String,
}

/// Token usage metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Sampling parameters for one kind of task, taken from the `[llm.*]` config sections.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: usize,
    pub max_input_chars: Option<usize>,
}

impl From<&common::GenerationConfig> for GenerationParams {
    fn from(cfg: &common::GenerationConfig) -> Self {
        Self {
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            max_input_chars: cfg.max_input_chars,
        }
    }
}

impl GenerationParams {
    pub fn request(&self, prompt: String) -> LlmRequest {
        LlmRequest {
            prompt,
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
        }
    }
}

pub mod remote;
pub mod summarizer;

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn params_build_request() {
        let params = GenerationParams::from(&common::GenerationConfig::summarization());
        let req = params.request("prompt".to_string());
        assert_eq!(req.max_tokens, Some(500));
        assert_eq!(req.temperature, Some(0.3));
    }
}
