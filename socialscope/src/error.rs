//! Error types shared by the external-service clients and the pipeline.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single call to an external service.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The call did not finish within its deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection, TLS or body-read failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx response
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// 2xx response whose body could not be used
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Refused before any request was sent
    #[error("blocked: {0}")]
    Blocked(String),
}

impl UpstreamError {
    /// Upstream HTTP status, when the service answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Status { status, .. } => Some(*status),
            UpstreamError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            UpstreamError::Timeout(_) => true,
            UpstreamError::Transport(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Build a `Status` error from a failed response, keeping its body for the logs.
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        UpstreamError::Status { status, body }
    }
}

/// Pipeline stage names, used in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discovery,
    Extraction,
    Summarization,
    PostSynthesis,
    ImageSynthesis,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Discovery => "discovery",
            Stage::Extraction => "extraction",
            Stage::Summarization => "summarization",
            Stage::PostSynthesis => "post_synthesis",
            Stage::ImageSynthesis => "image_synthesis",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An upstream failure attributed to the stage that made the call.
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: UpstreamError,
}

impl StageError {
    pub fn new(stage: Stage, source: UpstreamError) -> Self {
        Self { stage, source }
    }
}

/// Reasons a whole request fails.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("request deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_message_names_the_stage() {
        let err = StageError::new(
            Stage::PostSynthesis,
            UpstreamError::Status {
                status: 429,
                body: "slow down".to_string(),
            },
        );
        let msg = err.to_string();
        assert!(msg.starts_with("post_synthesis failed"));
        assert!(msg.contains("429"));
        assert_eq!(err.source.status(), Some(429));
    }

    #[test]
    fn timeout_is_reported_as_timeout() {
        let err = UpstreamError::Timeout(Duration::from_secs(2));
        assert!(err.is_timeout());
        assert!(err.to_string().contains("timed out"));
        assert_eq!(err.status(), None);
    }
}
