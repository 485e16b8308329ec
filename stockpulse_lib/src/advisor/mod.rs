//! Investment recommendation from an OpenAI-compatible chat model, with a
//! rule-based fallback when the model is unreachable or its reply is unusable.

pub mod client;
pub mod decode;
pub mod error;
pub mod fallback;
pub mod sentiment;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;

pub use client::{build_prompt, ChatAdvisor};
pub use error::AdvisorError;
pub use fallback::{rule_based, rule_signal};
pub use sentiment::SocialSentiment;
pub use types::{Action, Advice, Recommendation, RecommendationSource, RiskLevel};

use crate::stats::PortfolioStats;

/// A collaborator that turns portfolio statistics into one recommendation.
#[async_trait]
pub trait Advisor: Send + Sync {
    async fn recommend(&self, stats: &PortfolioStats) -> Result<Recommendation, AdvisorError>;
}

/// Asks `advisor` (if any) and falls back to [`rule_based`] on any failure,
/// including running past `timeout`. Never fails.
pub async fn advise(
    advisor: Option<&dyn Advisor>,
    stats: &PortfolioStats,
    timeout: Duration,
) -> Advice {
    let Some(advisor) = advisor else {
        return Advice {
            recommendation: rule_based(stats),
            source: RecommendationSource::RuleBased,
            fallback_reason: Some("no advisor configured".to_string()),
        };
    };
    let result = match tokio::time::timeout(timeout, advisor.recommend(stats)).await {
        Ok(result) => result,
        Err(_) => Err(AdvisorError::Timeout),
    };
    match result {
        Ok(recommendation) => Advice {
            recommendation,
            source: RecommendationSource::Llm,
            fallback_reason: None,
        },
        Err(e) => {
            tracing::warn!("Advisor unavailable, using rule-based fallback: {}", e);
            Advice {
                recommendation: rule_based(stats),
                source: RecommendationSource::RuleBased,
                fallback_reason: Some(e.to_string()),
            }
        }
    }
}
