//! Summary of a run of daily bars.

use serde::Serialize;

use crate::finnhub_api::types::Candle;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trend {
    pub sessions: usize,
    pub first_close: f64,
    pub last_close: f64,
    pub change_pct: f64,
    pub period_high: f64,
    pub period_low: f64,
    pub average_volume: f64,
    /// Sessions that closed above the prior session's close.
    pub up_sessions: usize,
}

impl Trend {
    /// `None` for an empty series or one whose first close is not positive.
    pub fn of(candles: &[Candle]) -> Option<Self> {
        let first = candles.first()?;
        let last = candles.last()?;
        if first.close <= 0.0 {
            return None;
        }
        let up_sessions = candles.windows(2).filter(|w| w[1].close > w[0].close).count();
        Some(Self {
            sessions: candles.len(),
            first_close: first.close,
            last_close: last.close,
            change_pct: (last.close - first.close) / first.close * 100.0,
            period_high: candles.iter().map(|c| c.high).fold(f64::MIN, f64::max),
            period_low: candles.iter().map(|c| c.low).fold(f64::MAX, f64::min),
            average_volume: candles.iter().map(|c| c.volume).sum::<f64>() / candles.len() as f64,
            up_sessions,
        })
    }
}
