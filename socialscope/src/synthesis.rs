use std::collections::HashSet;
use tracing::{info, warn};

use crate::discovery::ArticleReference;
use crate::error::UpstreamError;
use crate::llm::{GenerationParams, LlmProvider};

/// An article together with its (possibly empty) summary.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleWithSummary {
    pub article: ArticleReference,
    pub summary: String,
}

/// Formatting contract enforced on the model output.
#[derive(Debug, Clone)]
pub struct PostRules {
    pub min_hashtags: usize,
    /// Total model calls allowed before falling back to fix-up
    pub attempts: usize,
}

impl Default for PostRules {
    fn default() -> Self {
        Self {
            min_hashtags: 5,
            attempts: 2,
        }
    }
}

/// Build the post-synthesis instruction.
pub fn build_post_prompt(platform: &str, topic: &str, articles: &[ArticleWithSummary], min_hashtags: usize) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "You are a social media editor. Write a {} post about \"{}\".\n",
        platform, topic
    ));
    prompt.push_str(&format!(
        "Use the tone, register and length that work best on {}.\n",
        platform
    ));
    prompt.push_str("Start with a short title line.\n");

    if articles.is_empty() {
        prompt.push_str(
            "No reference articles were found for this topic. Write the post from general, well-established \
knowledge only, and do not cite or invent any article, source or URL.\n",
        );
    } else {
        prompt.push_str(
            "Every factual claim must come from the articles below, and each claim must cite its article \
title and URL.\n",
        );
    }

    prompt.push_str("Do not add any introduction or closing remarks about the post itself; output the post only.\n");
    prompt.push_str(&format!(
        "End with at least {} hashtags that are relevant to the topic and popular on {}.\n",
        min_hashtags, platform
    ));
    prompt.push_str("Do not use emphasis markup such as ** or __.\n");

    if !articles.is_empty() {
        prompt.push_str("\nREFERENCE ARTICLES:\n");
        for (i, entry) in articles.iter().enumerate() {
            prompt.push_str(&format!("\n[{}] {}\n", i + 1, entry.article.title));
            if let Some(source) = &entry.article.source {
                prompt.push_str(&format!("Source: {}\n", source));
            }
            prompt.push_str(&format!("URL: {}\n", entry.article.url));
            let summary = entry.summary.trim();
            if summary.is_empty() {
                prompt.push_str("Summary: (not available)\n");
            } else {
                prompt.push_str(&format!("Summary:\n{}\n", summary));
            }
        }
    }

    prompt
}

/// Ask the model for a post, re-asking when the output breaks the formatting
/// contract and fixing up the hashtags if every attempt falls short.
pub async fn synthesize_post<P: LlmProvider + ?Sized>(
    provider: &P,
    prompt: &str,
    params: &GenerationParams,
    rules: &PostRules,
    topic: &str,
    platform: &str,
) -> Result<String, UpstreamError> {
    let mut best = String::new();

    for attempt in 1..=rules.attempts.max(1) {
        let response = provider.generate(params.request(prompt.to_string())).await?;
        let text = strip_emphasis(response.content.trim());

        if text.is_empty() {
            warn!(attempt, "post synthesis: model returned an empty post");
            continue;
        }

        let found = count_hashtags(&text);
        if found >= rules.min_hashtags {
            info!(attempt, hashtags = found, tokens = response.usage.total_tokens, "post synthesis: compliant post");
            return Ok(text);
        }

        warn!(attempt, hashtags = found, required = rules.min_hashtags, "post synthesis: too few hashtags");
        if count_hashtags(&best) <= found {
            best = text;
        }
    }

    if best.is_empty() {
        return Err(UpstreamError::Malformed("model returned an empty post".to_string()));
    }
    Ok(ensure_hashtags(&best, topic, platform, rules.min_hashtags))
}

/// Remove `**` / `__` emphasis markers around words.
///
/// Only the non-alphanumeric edges of each whitespace-separated token are
/// touched, so `__` inside URLs and identifiers survives.
pub fn strip_emphasis(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while !rest.is_empty() {
        let word_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let (word, tail) = rest.split_at(word_end);
        out.push_str(&strip_word_markers(word));

        let space_end = tail.find(|c: char| !c.is_whitespace()).unwrap_or(tail.len());
        out.push_str(&tail[..space_end]);
        rest = &tail[space_end..];
    }
    out
}

fn strip_word_markers(word: &str) -> String {
    let first = word.find(char::is_alphanumeric);
    let last = word
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_alphanumeric())
        .map(|(i, c)| i + c.len_utf8());

    match (first, last) {
        (Some(start), Some(end)) => format!(
            "{}{}{}",
            remove_markers(&word[..start]),
            &word[start..end],
            remove_markers(&word[end..])
        ),
        _ => remove_markers(word),
    }
}

fn remove_markers(edge: &str) -> String {
    edge.replace("**", "").replace("__", "")
}

/// Hashtags present in `text`, without trailing punctuation.
pub fn hashtags(text: &str) -> Vec<&str> {
    text.split_whitespace()
        .filter_map(|token| {
            let tag = token.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_');
            let body = tag.strip_prefix('#')?;
            if body.chars().next().is_some_and(|c| c.is_alphanumeric()) && body.chars().all(|c| c.is_alphanumeric() || c == '_') {
                Some(tag)
            } else {
                None
            }
        })
        .collect()
}

/// Number of distinct hashtags, compared case-insensitively.
pub fn count_hashtags(text: &str) -> usize {
    distinct_hashtags(text).len()
}

fn distinct_hashtags(text: &str) -> HashSet<String> {
    hashtags(text).iter().map(|t| t.to_lowercase()).collect()
}

/// Append hashtags derived from the topic and platform until `text` carries at least `min`.
pub fn ensure_hashtags(text: &str, topic: &str, platform: &str, min: usize) -> String {
    let mut seen = distinct_hashtags(text);
    if seen.len() >= min {
        return text.to_string();
    }

    let mut extra = Vec::new();
    for candidate in fallback_hashtags(topic, platform) {
        if seen.len() >= min {
            break;
        }
        if seen.insert(candidate.to_lowercase()) {
            extra.push(candidate);
        }
    }

    if extra.is_empty() {
        return text.to_string();
    }
    format!("{}\n\n{}", text.trim_end(), extra.join(" "))
}

fn fallback_hashtags(topic: &str, platform: &str) -> Vec<String> {
    let words: Vec<String> = topic
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(capitalize)
        .collect();

    let mut tags = Vec::new();
    if !words.is_empty() {
        tags.push(format!("#{}", words.concat()));
    }
    tags.extend(words.iter().filter(|w| w.chars().count() >= 3).map(|w| format!("#{}", w)));

    let platform_tag: String = platform.chars().filter(|c| c.is_alphanumeric()).collect();
    if !platform_tag.is_empty() {
        tags.push(format!("#{}", platform_tag));
    }

    tags.extend(["#News", "#Trending", "#Insights", "#Innovation", "#Future"].iter().map(|t| t.to_string()));
    tags
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
