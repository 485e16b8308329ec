//! Stored user and history records.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::advisor::{Action, RecommendationSource, RiskLevel};
use crate::stats::Mover;
use crate::symbols::Symbol;

/// Optional per-user alert settings, passed through to the worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPreferences {
    /// Only mention symbols that moved at least this much in the email.
    #[serde(default)]
    pub price_move_threshold_pct: Option<f64>,
    /// Add the per-symbol rule signals table to the email.
    #[serde(default = "default_true")]
    pub include_rule_signals: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreference {
    pub user_id: String,
    pub email: String,
    pub selected_symbols: BTreeSet<Symbol>,
    pub daily_insights_opt_in: bool,
    pub last_analysis_date: Option<NaiveDate>,
    pub alert_preferences: Option<AlertPreferences>,
}

impl UserPreference {
    /// Opted in with at least one symbol.
    pub fn is_eligible(&self) -> bool {
        self.daily_insights_opt_in && !self.selected_symbols.is_empty()
    }
}

/// One page of a keyset-paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Pass back to get the next page; `None` when exhausted.
    pub next_cursor: Option<String>,
}

/// An append-only record of one daily analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisHistoryRecord {
    /// Assigned by the store; ignored on insert.
    pub id: i64,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub stocks_analyzed: Vec<Symbol>,
    pub top_gainer: Option<Mover>,
    pub top_loser: Option<Mover>,
    pub average_change_pct: f64,
    pub analysis_text: String,
    pub recommendation: Action,
    pub confidence: u8,
    pub risk_level: RiskLevel,
    pub source: RecommendationSource,
    pub email_sent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pref(opt_in: bool, symbols: &[&str]) -> UserPreference {
        UserPreference {
            user_id: "u1".into(),
            email: "u1@example.com".into(),
            selected_symbols: symbols.iter().map(|s| Symbol::parse(s).unwrap()).collect(),
            daily_insights_opt_in: opt_in,
            last_analysis_date: None,
            alert_preferences: None,
        }
    }

    #[test]
    fn eligibility() {
        assert!(pref(true, &["AAPL"]).is_eligible());
        assert!(!pref(false, &["AAPL"]).is_eligible());
        assert!(!pref(true, &[]).is_eligible());
    }

    #[test]
    fn alert_preferences_ignore_unknown_fields() {
        let prefs: AlertPreferences =
            serde_json::from_str(r#"{"priceMoveThresholdPct":2.5,"sms":true}"#).unwrap();
        assert_eq!(prefs.price_move_threshold_pct, Some(2.5));
        assert!(prefs.include_rule_signals);
    }
}
