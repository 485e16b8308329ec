//! Query parameter builders.

use url::Url;

/// Trait implemented by all query builders.
pub trait Query {
    /// Appends this query's parameters to the given URL, returning the modified URL.
    fn add_to_url(&self, url: &Url) -> Url;
}

/// Query for endpoints keyed by a single ticker (`/quote`, `/stock/profile2`).
#[derive(Debug, Clone)]
pub struct SymbolQuery {
    pub symbol: String,
}

impl SymbolQuery {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into().trim().to_uppercase(),
        }
    }
}

impl Query for SymbolQuery {
    fn add_to_url(&self, url: &Url) -> Url {
        let mut url = url.clone();
        url.query_pairs_mut().append_pair("symbol", &self.symbol);
        url
    }
}

/// Query for `/stock/candle`: one symbol, a resolution, and a unix-seconds range.
#[derive(Debug, Clone)]
pub struct CandleQuery {
    pub symbol: SymbolQuery,
    pub resolution: String,
    pub from: i64,
    pub to: i64,
}

impl CandleQuery {
    /// Daily bars between `from` and `to` (unix seconds, inclusive).
    pub fn daily(symbol: impl Into<String>, from: i64, to: i64) -> Self {
        Self {
            symbol: SymbolQuery::new(symbol),
            resolution: "D".to_string(),
            from,
            to,
        }
    }
}

impl Query for CandleQuery {
    fn add_to_url(&self, url: &Url) -> Url {
        let mut url = self.symbol.add_to_url(url);
        url.query_pairs_mut()
            .append_pair("resolution", &self.resolution)
            .append_pair("from", &self.from.to_string())
            .append_pair("to", &self.to.to_string());
        url
    }
}
