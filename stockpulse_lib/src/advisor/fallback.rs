//! Deterministic recommendation used when the model cannot be used.

use super::types::{Action, Recommendation, RiskLevel};
use crate::stats::PortfolioStats;

/// Moves beyond this many percent trigger a contrarian signal.
pub const SIGNAL_THRESHOLD_PCT: f64 = 5.0;

const FALLBACK_CONFIDENCE: u8 = 50;

/// `> +5%` take profit (`Sell`), `< -5%` buy the dip (`Buy`), else `Hold`.
pub fn rule_signal(change_pct: f64) -> Action {
    if change_pct > SIGNAL_THRESHOLD_PCT {
        Action::Sell
    } else if change_pct < -SIGNAL_THRESHOLD_PCT {
        Action::Buy
    } else {
        Action::Hold
    }
}

fn risk_for(change_pct: f64) -> RiskLevel {
    let magnitude = change_pct.abs();
    if magnitude > SIGNAL_THRESHOLD_PCT {
        RiskLevel::High
    } else if magnitude > 2.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Applies [`rule_signal`] to the portfolio's average change.
pub fn rule_based(stats: &PortfolioStats) -> Recommendation {
    let avg = stats.average_change_pct;
    let action = rule_signal(avg);
    let reasoning = match action {
        Action::Sell => format!(
            "Portfolio is up {:.2}% on average; consider taking profits.",
            avg
        ),
        Action::Buy => format!(
            "Portfolio is down {:.2}% on average; the dip may be a buying opportunity.",
            avg.abs()
        ),
        _ => format!(
            "Average move of {:+.2}% is within normal range; holding is reasonable.",
            avg
        ),
    };
    Recommendation {
        action,
        confidence: FALLBACK_CONFIDENCE,
        reasoning,
        risk_level: risk_for(avg),
        price_target: None,
        stop_loss: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quotes::{Quote, QuotePrices};
    use crate::symbols::Symbol;

    fn stats_with_avg(pct: f64) -> PortfolioStats {
        let q = Quote::from_prices(
            Symbol::parse("AAPL").unwrap(),
            QuotePrices {
                current: 100.0 * (1.0 + pct / 100.0),
                open: 100.0,
                high: 120.0,
                low: 80.0,
                previous_close: 100.0,
            },
            0,
        );
        PortfolioStats::compute(&[q], &[]).unwrap()
    }

    #[test]
    fn signal_thresholds() {
        assert_eq!(rule_signal(6.0), Action::Sell);
        assert_eq!(rule_signal(-6.0), Action::Buy);
        assert_eq!(rule_signal(0.5), Action::Hold);
        assert_eq!(rule_signal(5.0), Action::Hold);
        assert_eq!(rule_signal(-5.0), Action::Hold);
    }

    #[test]
    fn portfolio_fallback_uses_average() {
        let up = rule_based(&stats_with_avg(6.0));
        assert_eq!(up.action, Action::Sell);
        assert_eq!(up.risk_level, RiskLevel::High);

        let down = rule_based(&stats_with_avg(-6.0));
        assert_eq!(down.action, Action::Buy);
        assert!(down.reasoning.contains("6.00%"));

        let flat = rule_based(&stats_with_avg(0.5));
        assert_eq!(flat.action, Action::Hold);
        assert_eq!(flat.risk_level, RiskLevel::Low);
        assert_eq!(flat.confidence, 50);
    }
}
