//! Social-media sentiment for a single symbol, as judged by the chat model.
//!
//! Decoding is as strict as for recommendations: the score must lie in
//! [-1, 1] and the counts must be non-negative integers.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use super::decode::strip_code_fence;
use super::error::AdvisorError;
use crate::symbols::Symbol;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialSentiment {
    /// -1 very bearish, 0 neutral, 1 very bullish.
    pub sentiment_score: f64,
    pub bullish_count: u32,
    pub bearish_count: u32,
    #[serde(default)]
    pub neutral_count: u32,
    #[serde(default)]
    pub key_topics: Vec<String>,
}

impl SocialSentiment {
    /// `(bullish - bearish) / (bullish + bearish)`, 0 when nothing was counted.
    pub fn ratio(&self) -> f64 {
        let bull = f64::from(self.bullish_count);
        let bear = f64::from(self.bearish_count);
        (bull - bear) / (bull + bear).max(1.0)
    }

    pub fn label(&self) -> &'static str {
        if self.sentiment_score > 0.3 {
            "bullish"
        } else if self.sentiment_score > -0.3 {
            "neutral"
        } else {
            "bearish"
        }
    }
}

pub fn build_sentiment_prompt(symbol: &Symbol) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Analyze the current social media sentiment for stock ticker {} based on posts from the last 24 hours.",
        symbol
    );
    out.push_str(
        "Return JSON:\n\
         {\"sentiment_score\": number from -1 (very bearish) to 1 (very bullish), \
         \"bullish_count\": int, \"bearish_count\": int, \"neutral_count\": int, \
         \"key_topics\": [string]}",
    );
    out
}

pub fn decode_sentiment(content: &str) -> Result<SocialSentiment, AdvisorError> {
    let json = strip_code_fence(content);
    if json.is_empty() {
        return Err(AdvisorError::EmptyReply);
    }
    let sentiment: SocialSentiment =
        serde_json::from_str(json).map_err(|e| AdvisorError::Decode(e.to_string()))?;
    if !sentiment.sentiment_score.is_finite() || !(-1.0..=1.0).contains(&sentiment.sentiment_score) {
        return Err(AdvisorError::Decode(format!(
            "sentiment_score {} outside -1..1",
            sentiment.sentiment_score
        )));
    }
    Ok(sentiment)
}
