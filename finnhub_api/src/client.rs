//! HTTP client for the Finnhub REST API.

use std::time::Duration;

use serde::de::DeserializeOwned;
use url::Url;

use crate::{
    query::{CandleQuery, Query, SymbolQuery},
    types::{Candle, CandleResponse, CompanyProfile, QuoteResponse},
    Error,
};

/// Production API root.
pub const DEFAULT_BASE_URL: &str = "https://finnhub.io/api/v1";

/// Per-call timeout. Kept short so a hung call cannot stall a whole batch.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for the Finnhub API.
///
/// Holds one pooled `reqwest::Client`. Each method issues a single request;
/// non-2xx responses are mapped to typed [`Error`] variants and nothing is
/// retried here.
pub struct Client {
    client: reqwest::Client,
    api_key: String,
    /// Base URL for the API. Defaults to [`DEFAULT_BASE_URL`].
    base_api_url: String,
}

impl Client {
    /// Creates a new client pointing at the production API.
    pub fn new(api_key: String) -> Result<Self, Error> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    /// Creates a new client with a custom base URL. Used for testing with wiremock.
    pub fn with_base_url(base_url: &str, api_key: String) -> Result<Self, Error> {
        Self::with_timeout(base_url, api_key, DEFAULT_TIMEOUT)
    }

    /// Creates a new client with an explicit per-call timeout.
    pub fn with_timeout(base_url: &str, api_key: String, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            base_api_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn get_url(&self, path: &str, query: &impl Query) -> Result<Url, Error> {
        let mut url = Url::parse(format!("{}{}", &self.base_api_url, path).as_str()).map_err(|e| {
            tracing::error!("Invalid URL constructed: {}", e);
            Error::Network(format!("invalid url: {}", e))
        })?;
        url.query_pairs_mut().append_pair("token", &self.api_key);
        Ok(query.add_to_url(&url))
    }

    async fn get<T, Q>(&self, path: &str, query: &Q) -> Result<T, Error>
    where
        T: DeserializeOwned,
        Q: Query,
    {
        let url = self.get_url(path, query)?;
        let resp = self
            .client
            .get(url)
            .header("accept", "application/json")
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let snippet = truncate_body(&body);
            tracing::debug!("{} failed with status {}: {}", path, status, snippet);
            return Err(match status.as_u16() {
                404 => Error::NotFound,
                429 => Error::RateLimited,
                code @ (401 | 403) => Error::InvalidApiKey { status: code },
                code if status.is_server_error() => Error::Upstream {
                    status: code,
                    body: snippet,
                },
                code => Error::HttpStatus {
                    status: code,
                    body: snippet,
                },
            });
        }

        serde_json::from_str::<T>(&body).map_err(|e| {
            let snippet = truncate_body(&body);
            tracing::debug!("Failed to parse {}: {} | body: {}", path, e, snippet);
            Error::Malformed(format!("{} | body: {}", e, snippet))
        })
    }

    /// Fetches the real-time quote for one symbol.
    ///
    /// Finnhub answers unknown symbols with HTTP 200 and an all-zero body;
    /// that case is reported as [`Error::NotFound`].
    pub async fn get_quote(&self, symbol: &str) -> Result<QuoteResponse, Error> {
        let quote: QuoteResponse = self.get("/quote", &SymbolQuery::new(symbol)).await?;
        if quote.is_empty() {
            return Err(Error::NotFound);
        }
        Ok(quote)
    }

    /// Fetches the company profile for one symbol.
    pub async fn get_company_profile(&self, symbol: &str) -> Result<CompanyProfile, Error> {
        let profile: CompanyProfile = self
            .get("/stock/profile2", &SymbolQuery::new(symbol))
            .await?;
        if profile.is_empty() {
            return Err(Error::NotFound);
        }
        Ok(profile)
    }

    /// Fetches daily bars for `symbol` between `from` and `to` (unix seconds).
    ///
    /// `"no_data"` is reported as [`Error::NotFound`]; arrays of unequal
    /// length as [`Error::Malformed`].
    pub async fn get_daily_candles(&self, symbol: &str, from: i64, to: i64) -> Result<Vec<Candle>, Error> {
        let resp: CandleResponse = self
            .get("/stock/candle", &CandleQuery::daily(symbol, from, to))
            .await?;
        if !resp.is_ok() {
            return Err(Error::NotFound);
        }
        resp.candles()
            .ok_or_else(|| Error::Malformed("candle arrays differ in length".to_string()))
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...[truncated]", &body[..end])
    }
}
