//! Recommendation types shared by the model decoder and the fallback.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Trade action. The model may answer with the three-level
/// (`BUY`/`HOLD`/`SELL`) or five-level vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Action {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrongBuy => "STRONG_BUY",
            Self::Buy => "BUY",
            Self::Hold => "HOLD",
            Self::Sell => "SELL",
            Self::StrongSell => "STRONG_SELL",
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        match norm.as_str() {
            "STRONG_BUY" => Ok(Self::StrongBuy),
            "BUY" => Ok(Self::Buy),
            "HOLD" => Ok(Self::Hold),
            "SELL" => Ok(Self::Sell),
            "STRONG_SELL" => Ok(Self::StrongSell),
            _ => Err(format!("unknown recommendation: {}", s)),
        }
    }
}

impl TryFrom<String> for Action {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Action> for String {
    fn from(a: Action) -> Self {
        a.as_str().to_string()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::VeryHigh => "VERY_HIGH",
        }
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        match norm.as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "VERY_HIGH" => Ok(Self::VeryHigh),
            _ => Err(format!("unknown risk level: {}", s)),
        }
    }
}

impl TryFrom<String> for RiskLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RiskLevel> for String {
    fn from(r: RiskLevel) -> Self {
        r.as_str().to_string()
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated recommendation. `confidence` is 0-100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    #[serde(rename = "recommendation")]
    pub action: Action,
    pub confidence: u8,
    pub reasoning: String,
    pub risk_level: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_target: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
}

/// Where a recommendation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    Llm,
    RuleBased,
}

impl RecommendationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::RuleBased => "rule_based",
        }
    }
}

impl FromStr for RecommendationSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "llm" => Ok(Self::Llm),
            "rule_based" => Ok(Self::RuleBased),
            other => Err(format!("unknown recommendation source: {}", other)),
        }
    }
}

impl fmt::Display for RecommendationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recommendation plus its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Advice {
    pub recommendation: Recommendation,
    pub source: RecommendationSource,
    /// Why the fallback was used, when it was.
    pub fallback_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_accepts_both_vocabularies() {
        assert_eq!("buy".parse::<Action>().unwrap(), Action::Buy);
        assert_eq!("Strong Buy".parse::<Action>().unwrap(), Action::StrongBuy);
        assert_eq!("strong-sell".parse::<Action>().unwrap(), Action::StrongSell);
        assert_eq!("STRONG_SELL".parse::<Action>().unwrap(), Action::StrongSell);
        assert!("ACCUMULATE".parse::<Action>().is_err());
    }

    #[test]
    fn risk_level_is_case_insensitive() {
        assert_eq!("medium".parse::<RiskLevel>().unwrap(), RiskLevel::Medium);
        assert!("EXTREME".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn risk_level_accepts_very_high_spellings() {
        for s in ["VERY_HIGH", "very high", "Very-High"] {
            assert_eq!(s.parse::<RiskLevel>().unwrap(), RiskLevel::VeryHigh, "{}", s);
        }
        assert_eq!(RiskLevel::VeryHigh.to_string(), "VERY_HIGH");
    }

    #[test]
    fn source_round_trips() {
        for s in [RecommendationSource::Llm, RecommendationSource::RuleBased] {
            assert_eq!(s.as_str().parse::<RecommendationSource>().unwrap(), s);
        }
    }
}
