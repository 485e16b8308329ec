//! Per-user portfolio statistics over cached quotes.

use serde::{Deserialize, Serialize};

use crate::quotes::Quote;
use crate::symbols::Symbol;

/// One symbol's move, as shown in the email and stored in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mover {
    pub symbol: Symbol,
    pub current_price: f64,
    pub change_pct: f64,
}

impl Mover {
    fn of(q: &Quote) -> Self {
        Self {
            symbol: q.symbol.clone(),
            current_price: q.current_price,
            change_pct: q.change_pct,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolStat {
    pub symbol: Symbol,
    pub current_price: f64,
    pub change_abs: f64,
    pub change_pct: f64,
    pub intraday_range_pct: Option<f64>,
    pub gap_pct: Option<f64>,
}

/// Aggregates for one user's resolved symbols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioStats {
    pub symbols: Vec<SymbolStat>,
    pub top_gainer: Mover,
    pub top_loser: Mover,
    pub average_change_pct: f64,
    /// Requested symbols that had no stored quote.
    pub missing: Vec<Symbol>,
}

impl PortfolioStats {
    /// Returns `None` when `quotes` is empty. Ties for top gainer / loser go
    /// to the symbol listed first.
    pub fn compute(quotes: &[Quote], requested: &[Symbol]) -> Option<Self> {
        let first = quotes.first()?;
        let mut gainer = first;
        let mut loser = first;
        let mut total = 0.0;
        for q in quotes {
            if q.change_pct > gainer.change_pct {
                gainer = q;
            }
            if q.change_pct < loser.change_pct {
                loser = q;
            }
            total += q.change_pct;
        }

        let missing = requested
            .iter()
            .filter(|s| !quotes.iter().any(|q| &q.symbol == *s))
            .cloned()
            .collect();

        Some(Self {
            symbols: quotes
                .iter()
                .map(|q| SymbolStat {
                    symbol: q.symbol.clone(),
                    current_price: q.current_price,
                    change_abs: q.change_abs,
                    change_pct: q.change_pct,
                    intraday_range_pct: q.intraday_range_pct(),
                    gap_pct: q.gap_pct(),
                })
                .collect(),
            top_gainer: Mover::of(gainer),
            top_loser: Mover::of(loser),
            average_change_pct: total / quotes.len() as f64,
            missing,
        })
    }

    pub fn analyzed(&self) -> Vec<Symbol> {
        self.symbols.iter().map(|s| s.symbol.clone()).collect()
    }
}
