//! Error types for the API client.

/// Errors that can occur when making API requests.
///
/// Every variant is cheap to clone so batch callers can keep a per-symbol
/// record of what went wrong.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The symbol is unknown to the provider.
    #[error("Symbol not found")]
    NotFound,
    /// The provider rejected the call because the request budget is exhausted (HTTP 429).
    #[error("Rate limited (HTTP 429)")]
    RateLimited,
    /// The API key was rejected (HTTP 401/403).
    #[error("Invalid API key (HTTP {status})")]
    InvalidApiKey { status: u16 },
    /// The provider failed on its side (HTTP 5xx).
    #[error("Upstream error with status {status}")]
    Upstream { status: u16, body: String },
    /// Any other non-success status.
    #[error("Request failed with status {status}")]
    HttpStatus { status: u16, body: String },
    /// The call did not complete within the configured timeout.
    #[error("Request timed out")]
    Timeout,
    /// Connection-level failure before a response was received.
    #[error("Network error: {0}")]
    Network(String),
    /// The body was not the JSON shape we expect.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl Error {
    /// Whether the failure is worth retrying on a later run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Upstream { .. } | Self::Timeout | Self::Network(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            // Strip the URL so the API token never ends up in a log line.
            Self::Network(e.without_url().to_string())
        }
    }
}
