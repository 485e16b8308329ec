//! Strict decoding of the model's reply into a [`Recommendation`].
//!
//! The reply must be a single JSON object, optionally wrapped in a Markdown
//! code fence. Missing fields, unknown enum values, and out-of-range numbers
//! are errors; there is no best-effort repair.

use serde::Deserialize;

use super::error::AdvisorError;
use super::types::{Action, Recommendation, RiskLevel};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecommendation {
    recommendation: Action,
    confidence: f64,
    reasoning: String,
    risk_level: RiskLevel,
    #[serde(default)]
    price_target: Option<f64>,
    #[serde(default)]
    stop_loss: Option<f64>,
}

/// Removes a surrounding ```` ```json ```` / ```` ``` ```` fence if present.
pub fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let body = if let Some(idx) = trimmed.find("```json") {
        &trimmed[idx + "```json".len()..]
    } else if let Some(idx) = trimmed.find("```") {
        &trimmed[idx + 3..]
    } else {
        return trimmed;
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

pub fn decode_recommendation(content: &str) -> Result<Recommendation, AdvisorError> {
    let json = strip_code_fence(content);
    if json.is_empty() {
        return Err(AdvisorError::EmptyReply);
    }
    let raw: RawRecommendation =
        serde_json::from_str(json).map_err(|e| AdvisorError::Decode(e.to_string()))?;

    if !raw.confidence.is_finite() || !(0.0..=100.0).contains(&raw.confidence) {
        return Err(AdvisorError::Decode(format!(
            "confidence {} outside 0-100",
            raw.confidence
        )));
    }
    if raw.reasoning.trim().is_empty() {
        return Err(AdvisorError::Decode("reasoning is empty".to_string()));
    }
    for (name, value) in [("priceTarget", raw.price_target), ("stopLoss", raw.stop_loss)] {
        if let Some(v) = value {
            if !v.is_finite() || v <= 0.0 {
                return Err(AdvisorError::Decode(format!("{} must be positive, got {}", name, v)));
            }
        }
    }

    Ok(Recommendation {
        action: raw.recommendation,
        confidence: raw.confidence.round() as u8,
        reasoning: raw.reasoning.trim().to_string(),
        risk_level: raw.risk_level,
        price_target: raw.price_target,
        stop_loss: raw.stop_loss,
    })
}
