//! Market-wide summary derived from a set of quotes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::America::New_York;
use serde::{Deserialize, Serialize};

use crate::quotes::Quote;

/// US equity session state, judged on the New York wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketStatus {
    PreMarket,
    Open,
    AfterHours,
    Closed,
}

impl MarketStatus {
    /// Weekdays only; 04:00-09:30 pre-market, 09:30-16:00 open, 16:00-20:00
    /// after hours. Exchange holidays are not modelled.
    pub fn at(now: DateTime<Utc>) -> Self {
        let local = now.with_timezone(&New_York);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return Self::Closed;
        }
        let t = NaiveTime::from_hms_opt(local.hour(), local.minute(), 0).unwrap_or_default();
        let hm = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap_or_default();
        if t < hm(4, 0) {
            Self::Closed
        } else if t < hm(9, 30) {
            Self::PreMarket
        } else if t < hm(16, 0) {
            Self::Open
        } else if t < hm(20, 0) {
            Self::AfterHours
        } else {
            Self::Closed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreMarket => "PRE_MARKET",
            Self::Open => "OPEN",
            Self::AfterHours => "AFTER_HOURS",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRE_MARKET" => Ok(Self::PreMarket),
            "OPEN" => Ok(Self::Open),
            "AFTER_HOURS" => Ok(Self::AfterHours),
            "CLOSED" => Ok(Self::Closed),
            other => Err(format!("unknown market status: {}", other)),
        }
    }
}

/// The single market-summary row, overwritten on each refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSummaryRecord {
    pub total_symbols: usize,
    pub gainers: usize,
    pub losers: usize,
    pub unchanged: usize,
    pub last_updated_at: DateTime<Utc>,
    pub market_status: MarketStatus,
}

impl MarketSummaryRecord {
    /// Breadth as gainers / (gainers + losers), or `None` if nothing moved.
    pub fn advance_ratio(&self) -> Option<f64> {
        let moved = self.gainers + self.losers;
        if moved == 0 {
            None
        } else {
            Some(self.gainers as f64 / moved as f64)
        }
    }
}

/// Counts gainers, losers, and unchanged over `quotes`. Callers pass only the
/// successfully fetched quotes, so `total_symbols` is that count.
pub fn summarize<'a, I>(quotes: I, now: DateTime<Utc>) -> MarketSummaryRecord
where
    I: IntoIterator<Item = &'a Quote>,
{
    let mut summary = MarketSummaryRecord {
        total_symbols: 0,
        gainers: 0,
        losers: 0,
        unchanged: 0,
        last_updated_at: now,
        market_status: MarketStatus::at(now),
    };
    for q in quotes {
        summary.total_symbols += 1;
        if q.change_pct > 0.0 {
            summary.gainers += 1;
        } else if q.change_pct < 0.0 {
            summary.losers += 1;
        } else {
            summary.unchanged += 1;
        }
    }
    summary
}
