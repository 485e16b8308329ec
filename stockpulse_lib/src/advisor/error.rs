//! Error types for advisor calls.

use thiserror::Error;

/// Errors from the chat-completions advisor. Every variant triggers the
/// rule-based fallback.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdvisorError {
    #[error("Rate limited by advisor API (HTTP 429)")]
    RateLimited,
    #[error("Advisor API key rejected (HTTP {0})")]
    Unauthorized(u16),
    #[error("Advisor API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Advisor request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Advisor reply had no content")]
    EmptyReply,
    #[error("Advisor reply is not a valid recommendation: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for AdvisorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.without_url().to_string())
        }
    }
}
