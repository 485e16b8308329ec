//! Heuristic next-session price projection.
//!
//! Combines the latest quote's shape (momentum, opening gap, distance to the
//! day's high and low) with an optional social sentiment score into a capped
//! percentage move and a 0-100 confidence. This is a weighted rule set, not a
//! trained model.

use serde::Serialize;

use crate::advisor::SocialSentiment;
use crate::quotes::Quote;
use crate::symbols::Symbol;

/// Largest projected move either way, in percent.
pub const MAX_MOVE_PCT: f64 = 5.0;

const MOMENTUM_WEIGHT: f64 = 0.3;
const SENTIMENT_WEIGHT: f64 = 2.0;
const GAP_WEIGHT: f64 = -0.2;
const MEAN_REVERSION_WEIGHT: f64 = -0.1;
const SUPPORT_BOUNCE: f64 = 0.5;
const RESISTANCE_PRESSURE: f64 = -0.3;
/// Within this many percent of the low (or high) counts as sitting on it.
const LEVEL_PROXIMITY_PCT: f64 = 1.0;

/// Per-factor contributions, in percent, before the cap.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Factors {
    pub momentum: f64,
    pub sentiment: f64,
    pub gap_recovery: f64,
    pub mean_reversion: f64,
    pub support_bounce: f64,
    pub resistance_pressure: f64,
}

impl Factors {
    fn total(&self) -> f64 {
        self.momentum
            + self.sentiment
            + self.gap_recovery
            + self.mean_reversion
            + self.support_bounce
            + self.resistance_pressure
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub symbol: Symbol,
    pub current_price: f64,
    pub projected_price: f64,
    pub projected_change_pct: f64,
    pub confidence: f64,
    pub factors: Factors,
}

impl Projection {
    pub fn projected_change(&self) -> f64 {
        self.projected_price - self.current_price
    }
}

/// Projects the next session for one quote.
///
/// Returns `None` when the quote has no usable prices (zero current, high,
/// or previous close), which is how the upstream reports unknown symbols.
pub fn project(quote: &Quote, sentiment: Option<&SocialSentiment>) -> Option<Projection> {
    let current = quote.current_price;
    if current <= 0.0 || quote.high_price <= 0.0 || quote.previous_close <= 0.0 {
        return None;
    }

    let daily_range = (quote.high_price - quote.low_price) / current * 100.0;
    let gap = (quote.open_price - quote.previous_close) / quote.previous_close * 100.0;
    let close_to_high = (quote.high_price - current) / quote.high_price * 100.0;
    let support_distance = (current - quote.low_price) / current * 100.0;
    let resistance_distance = (quote.high_price - current) / current * 100.0;
    let score = sentiment.map_or(0.0, |s| s.sentiment_score);

    let factors = Factors {
        momentum: quote.change_pct * MOMENTUM_WEIGHT,
        sentiment: score * SENTIMENT_WEIGHT,
        gap_recovery: gap * GAP_WEIGHT,
        mean_reversion: close_to_high * MEAN_REVERSION_WEIGHT,
        support_bounce: if support_distance < LEVEL_PROXIMITY_PCT { SUPPORT_BOUNCE } else { 0.0 },
        resistance_pressure: if resistance_distance < LEVEL_PROXIMITY_PCT {
            RESISTANCE_PRESSURE
        } else {
            0.0
        },
    };

    let change_pct = factors.total().clamp(-MAX_MOVE_PCT, MAX_MOVE_PCT);
    let confidence = (50.0 + score.abs() * 20.0 + (100.0 - daily_range) * 0.2 - gap.abs() * 5.0).clamp(0.0, 100.0);

    Some(Projection {
        symbol: quote.symbol.clone(),
        current_price: current,
        projected_price: current * (1.0 + change_pct / 100.0),
        projected_change_pct: change_pct,
        confidence,
        factors,
    })
}

/// Projects every quote and orders the result by projected move, largest
/// gain first. Quotes without usable prices are left out.
pub fn project_all<'a, F>(quotes: &[Quote], sentiment_for: F) -> Vec<Projection>
where
    F: Fn(&Symbol) -> Option<&'a SocialSentiment>,
{
    let mut out: Vec<Projection> = quotes.iter().filter_map(|q| project(q, sentiment_for(&q.symbol))).collect();
    out.sort_by(|a, b| b.projected_change_pct.total_cmp(&a.projected_change_pct));
    out
}
