//! Sequential, rate-limited quote fetching for a list of symbols.
//!
//! Symbols are fetched one at a time in input order. Every call first waits
//! on the shared [`RateLimiter`], so a batch of any size stays inside the
//! provider budget. A failing symbol is recorded and the batch moves on.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

use crate::cache::{CacheEntry, QuoteCache};
use crate::quotes::{Quote, QuoteSource};
use crate::rate_limiter::{RateLimiter, TrackerSummary};
use crate::symbols::Symbol;

/// What to emit for a symbol whose fetch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// The symbol appears only in the failure list.
    #[default]
    Skip,
    /// The symbol also gets an explicitly marked placeholder carrying the
    /// last cached quote, if one exists. Prices are never invented.
    Placeholder,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "placeholder" => Ok(Self::Placeholder),
            other => Err(format!(
                "unknown failure policy '{}' (expected skip or placeholder)",
                other
            )),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => f.write_str("skip"),
            Self::Placeholder => f.write_str("placeholder"),
        }
    }
}

/// Per-symbol result of a batch run.
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolOutcome {
    Fetched(Quote),
    Failed(finnhub_api::Error),
    /// Fetch failed under [`FailurePolicy::Placeholder`]. `last_known` is the
    /// stale cached entry, if any; consumers must treat it as out of date.
    Placeholder {
        error: finnhub_api::Error,
        last_known: Option<CacheEntry>,
    },
}

impl SymbolOutcome {
    pub fn quote(&self) -> Option<&Quote> {
        match self {
            Self::Fetched(q) => Some(q),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&finnhub_api::Error> {
        match self {
            Self::Fetched(_) => None,
            Self::Failed(e) | Self::Placeholder { error: e, .. } => Some(e),
        }
    }
}

/// Outcomes for every requested symbol, in request order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<(Symbol, SymbolOutcome)>,
    pub requests: Option<TrackerSummary>,
}

impl BatchReport {
    /// Successfully fetched quotes only.
    pub fn quotes(&self) -> impl Iterator<Item = &Quote> {
        self.outcomes.iter().filter_map(|(_, o)| o.quote())
    }

    /// Failed symbols with their reasons (placeholders included).
    pub fn failures(&self) -> impl Iterator<Item = (&Symbol, &finnhub_api::Error)> {
        self.outcomes
            .iter()
            .filter_map(|(s, o)| o.error().map(|e| (s, e)))
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&SymbolOutcome> {
        self.outcomes
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, o)| o)
    }

    pub fn success_count(&self) -> usize {
        self.quotes().count()
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Fetches quotes for many symbols without exceeding the provider budget.
pub struct BatchFetcher {
    source: Arc<dyn QuoteSource>,
    limiter: Arc<RateLimiter>,
    cache: Option<Arc<QuoteCache>>,
    policy: FailurePolicy,
    max_jitter: Duration,
}

impl BatchFetcher {
    pub fn new(source: Arc<dyn QuoteSource>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            source,
            limiter,
            cache: None,
            policy: FailurePolicy::default(),
            max_jitter: Duration::ZERO,
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Write every successful quote through to `cache`. Also the source of
    /// `last_known` for placeholders.
    pub fn with_cache(mut self, cache: Arc<QuoteCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Random extra delay (0..=max) after each limiter slot. Only ever slows
    /// the batch down.
    pub fn with_jitter(mut self, max: Duration) -> Self {
        self.max_jitter = max;
        self
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub async fn fetch_all(&self, symbols: &[Symbol]) -> BatchReport {
        self.fetch_all_with_progress(symbols, |_, _, _| {}).await
    }

    /// Like [`fetch_all`](Self::fetch_all), calling `on_progress(done, symbol,
    /// outcome)` after each symbol.
    pub async fn fetch_all_with_progress<F>(&self, symbols: &[Symbol], mut on_progress: F) -> BatchReport
    where
        F: FnMut(usize, &Symbol, &SymbolOutcome),
    {
        let mut outcomes = Vec::with_capacity(symbols.len());
        // A rejected key fails every remaining call the same way.
        let mut key_rejected: Option<finnhub_api::Error> = None;

        for (i, symbol) in symbols.iter().enumerate() {
            let result = match &key_rejected {
                Some(err) => Err(err.clone()),
                None => self.fetch_one(symbol).await,
            };

            let outcome = match result {
                Ok(quote) => {
                    if let Some(cache) = &self.cache {
                        cache.put(symbol.clone(), quote.clone());
                    }
                    SymbolOutcome::Fetched(quote)
                }
                Err(err) => {
                    if key_rejected.is_none() {
                        tracing::warn!("Quote fetch failed for {}: {}", symbol, err);
                    }
                    if matches!(err, finnhub_api::Error::InvalidApiKey { .. }) && key_rejected.is_none() {
                        tracing::error!(
                            "API key rejected; skipping remaining {} symbols",
                            symbols.len() - i - 1
                        );
                        key_rejected = Some(err.clone());
                    }
                    match self.policy {
                        FailurePolicy::Skip => SymbolOutcome::Failed(err),
                        FailurePolicy::Placeholder => SymbolOutcome::Placeholder {
                            error: err,
                            last_known: self.cache.as_ref().and_then(|c| c.peek(symbol)),
                        },
                    }
                }
            };

            on_progress(i + 1, symbol, &outcome);
            outcomes.push((symbol.clone(), outcome));
        }

        let report = BatchReport {
            outcomes,
            requests: Some(self.limiter.tracker().summary()),
        };
        tracing::info!(
            "Batch complete: {} fetched, {} failed of {}",
            report.success_count(),
            report.failure_count(),
            report.len()
        );
        report
    }

    async fn fetch_one(&self, symbol: &Symbol) -> Result<Quote, finnhub_api::Error> {
        self.limiter.acquire().await;
        if !self.max_jitter.is_zero() {
            let ms = rand::thread_rng().gen_range(0..=self.max_jitter.as_millis() as u64);
            sleep(Duration::from_millis(ms)).await;
        }

        let tracker = self.limiter.tracker();
        let result = self.source.fetch_quote(symbol).await;
        match &result {
            Ok(_) => tracker.record_success(),
            Err(finnhub_api::Error::RateLimited) => tracker.record_rate_limited(),
            Err(_) => tracker.record_failure(),
        }
        tracing::debug!("fetched {} ({})", symbol, if result.is_ok() { "ok" } else { "err" });
        result
    }
}
