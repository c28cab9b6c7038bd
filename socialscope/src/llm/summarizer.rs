// Summarizer module
use tracing::info;

use super::{truncate_chars, GenerationParams, LlmProvider};
use crate::error::UpstreamError;

/// Build the single-turn summarization instruction for an extracted article.
pub fn build_summary_prompt(article_text: &str, max_input_chars: Option<usize>) -> String {
    let text = match max_input_chars {
        Some(limit) => truncate_chars(article_text, limit),
        None => article_text,
    };

    format!(
        "Summarize the following article as a bulleted list of the 10 most important points. \
Respond with the bulleted list only. Do not add any introduction, commentary or closing remarks \
before or after the list.\n\nARTICLE:\n{}",
        text
    )
}

/// Summarize one article. The model's text is returned verbatim.
pub async fn summarize_article<P: LlmProvider + ?Sized>(
    provider: &P,
    article_text: &str,
    params: &GenerationParams,
) -> Result<String, UpstreamError> {
    let prompt = build_summary_prompt(article_text, params.max_input_chars);
    let response = provider.generate(params.request(prompt)).await?;

    info!(
        "LLM summarization successful: {} chars, {} tokens",
        response.content.len(),
        response.usage.total_tokens
    );

    Ok(response.content)
}
