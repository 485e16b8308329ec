//! Point-in-time price snapshots and the sources that produce them.

use std::sync::Arc;

use async_trait::async_trait;
use finnhub_api::types::QuoteResponse;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::symbols::Symbol;

/// Raw prices for one symbol, before the derived change fields are computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotePrices {
    pub current: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub previous_close: f64,
}

/// A single point-in-time price snapshot.
///
/// `change_abs` and `change_pct` are always derived from `current_price` and
/// `previous_close`; construct through [`Quote::from_prices`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: Symbol,
    pub current_price: f64,
    pub open_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub previous_close: f64,
    pub change_abs: f64,
    pub change_pct: f64,
    pub fetched_at_epoch_seconds: i64,
}

impl Quote {
    pub fn from_prices(symbol: Symbol, prices: QuotePrices, fetched_at_epoch_seconds: i64) -> Self {
        let change_abs = prices.current - prices.previous_close;
        let change_pct = if prices.previous_close != 0.0 {
            change_abs / prices.previous_close * 100.0
        } else {
            0.0
        };
        Self {
            symbol,
            current_price: prices.current,
            open_price: prices.open,
            high_price: prices.high,
            low_price: prices.low,
            previous_close: prices.previous_close,
            change_abs,
            change_pct,
            fetched_at_epoch_seconds,
        }
    }

    /// Builds a quote from a provider response. The provider's own `d`/`dp`
    /// fields are ignored in favour of recomputing them.
    pub fn from_response(symbol: Symbol, resp: &QuoteResponse, fetched_at_epoch_seconds: i64) -> Self {
        Self::from_prices(
            symbol,
            QuotePrices {
                current: resp.current,
                open: resp.open,
                high: resp.high,
                low: resp.low,
                previous_close: resp.previous_close,
            },
            fetched_at_epoch_seconds,
        )
    }

    /// Intraday range as a percentage of the current price.
    pub fn intraday_range_pct(&self) -> Option<f64> {
        if self.current_price == 0.0 {
            return None;
        }
        Some((self.high_price - self.low_price) / self.current_price * 100.0)
    }

    /// Opening gap relative to the previous close.
    pub fn gap_pct(&self) -> Option<f64> {
        if self.previous_close == 0.0 {
            return None;
        }
        Some((self.open_price - self.previous_close) / self.previous_close * 100.0)
    }
}

/// Anything that can produce a fresh quote for one symbol.
///
/// Implementations make at most one upstream call per invocation and do not
/// retry; pacing is the caller's job.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, finnhub_api::Error>;
}

/// [`QuoteSource`] backed by the Finnhub REST API.
pub struct FinnhubSource {
    client: finnhub_api::Client,
    clock: Arc<dyn Clock>,
}

impl FinnhubSource {
    pub fn new(client: finnhub_api::Client, clock: Arc<dyn Clock>) -> Self {
        Self { client, clock }
    }

    pub fn client(&self) -> &finnhub_api::Client {
        &self.client
    }
}

#[async_trait]
impl QuoteSource for FinnhubSource {
    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, finnhub_api::Error> {
        let resp = self.client.get_quote(symbol.as_str()).await?;
        Ok(Quote::from_response(
            symbol.clone(),
            &resp,
            self.clock.now().timestamp(),
        ))
    }
}
