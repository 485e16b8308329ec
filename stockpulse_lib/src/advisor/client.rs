//! OpenAI-compatible chat-completions client (x.ai Grok by default).

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::decode::decode_recommendation;
use super::error::AdvisorError;
use super::sentiment::{build_sentiment_prompt, decode_sentiment, SocialSentiment};
use super::types::Recommendation;
use super::Advisor;
use crate::stats::PortfolioStats;
use crate::symbols::Symbol;

pub const DEFAULT_BASE_URL: &str = "https://api.x.ai/v1";
pub const DEFAULT_MODEL: &str = "grok-3-mini-fast";

/// Request timeout for one completion.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const TEMPERATURE: f32 = 0.3;
const MAX_TOKENS: u32 = 600;

const SYSTEM_PROMPT: &str = "You are a cautious equity analyst. Reply with a single JSON object and nothing else.";
const SENTIMENT_SYSTEM_PROMPT: &str =
    "You are a financial sentiment analyzer with access to recent social media posts. Reply with a single JSON object and nothing else.";
const SENTIMENT_MAX_TOKENS: u32 = 1000;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Renders the user prompt for one portfolio.
pub fn build_prompt(stats: &PortfolioStats) -> String {
    let mut out = String::from("Daily portfolio snapshot:\n");
    for s in &stats.symbols {
        let _ = write!(
            out,
            "- {}: price {:.2}, change {:+.2} ({:+.2}%)",
            s.symbol, s.current_price, s.change_abs, s.change_pct
        );
        if let Some(range) = s.intraday_range_pct {
            let _ = write!(out, ", intraday range {:.2}%", range);
        }
        if let Some(gap) = s.gap_pct {
            let _ = write!(out, ", opening gap {:+.2}%", gap);
        }
        out.push('\n');
    }
    let _ = writeln!(
        out,
        "Top gainer: {} ({:+.2}%). Top loser: {} ({:+.2}%). Average change: {:+.2}%.",
        stats.top_gainer.symbol,
        stats.top_gainer.change_pct,
        stats.top_loser.symbol,
        stats.top_loser.change_pct,
        stats.average_change_pct
    );
    out.push_str(
        "\nGive one overall recommendation for this portfolio as JSON:\n\
         {\"recommendation\": \"STRONG_BUY|BUY|HOLD|SELL|STRONG_SELL\", \
         \"confidence\": 0-100, \"reasoning\": string, \"riskLevel\": \"LOW|MEDIUM|HIGH|VERY_HIGH\", \
         \"priceTarget\": number (optional), \"stopLoss\": number (optional)}",
    );
    out
}

/// [`Advisor`] that calls `POST {base}/chat/completions` once per request.
pub struct ChatAdvisor {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ChatAdvisor {
    pub fn new(api_key: String) -> Result<Self, AdvisorError> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key, DEFAULT_MODEL, DEFAULT_TIMEOUT)
    }

    /// Custom endpoint, model, and timeout. Used for testing with wiremock.
    pub fn with_base_url(
        base_url: &str,
        api_key: String,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, AdvisorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Social-media sentiment for one symbol over the last day.
    pub async fn sentiment(&self, symbol: &Symbol) -> Result<SocialSentiment, AdvisorError> {
        let content = self
            .complete(SENTIMENT_SYSTEM_PROMPT, build_sentiment_prompt(symbol), SENTIMENT_MAX_TOKENS)
            .await?;
        decode_sentiment(&content)
    }

    async fn complete(&self, system: &str, prompt: String, max_tokens: u32) -> Result<String, AdvisorError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(system.to_string()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Some(prompt),
                },
            ],
            temperature: TEMPERATURE,
            max_tokens,
        };

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let body: String = body.chars().take(200).collect();
            return Err(match status.as_u16() {
                429 => AdvisorError::RateLimited,
                code @ (401 | 403) => AdvisorError::Unauthorized(code),
                code => AdvisorError::Status { status: code, body },
            });
        }

        let parsed: ChatResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(AdvisorError::EmptyReply)
    }
}

#[async_trait]
impl Advisor for ChatAdvisor {
    async fn recommend(&self, stats: &PortfolioStats) -> Result<Recommendation, AdvisorError> {
        let content = self.complete(SYSTEM_PROMPT, build_prompt(stats), MAX_TOKENS).await?;
        tracing::debug!("advisor reply: {} chars", content.len());
        decode_recommendation(&content)
    }
}
