//! Scheduled bulk refresh: fetch the universe, persist quotes, and rewrite
//! the market summary.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::batch::{BatchFetcher, SymbolOutcome};
use crate::clock::Clock;
use crate::db::{Db, WriteKind};
use crate::error::StockPulseError;
use crate::market::{summarize, MarketSummaryRecord};
use crate::rate_limiter::TrackerSummary;
use crate::symbols::Symbol;

/// `ingest_meta` key holding the RFC 3339 time of the last completed run.
pub const LAST_REFRESH_KEY: &str = "last_refresh_at";

#[derive(Debug, Clone)]
pub struct RefreshReport {
    pub requested: usize,
    pub fetched: usize,
    pub failed: Vec<(Symbol, String)>,
    pub created: usize,
    pub updated: usize,
    pub summary: MarketSummaryRecord,
    pub requests: Option<TrackerSummary>,
}

pub struct MarketDataRefreshJob {
    db: Arc<Db>,
    fetcher: BatchFetcher,
    clock: Arc<dyn Clock>,
}

impl MarketDataRefreshJob {
    pub fn new(db: Arc<Db>, fetcher: BatchFetcher, clock: Arc<dyn Clock>) -> Self {
        Self { db, fetcher, clock }
    }

    pub async fn run(&self, universe: &[Symbol]) -> Result<RefreshReport, StockPulseError> {
        self.run_with_progress(universe, |_, _, _| {}).await
    }

    /// Runs one refresh. A store error aborts the run; fetch failures never do.
    pub async fn run_with_progress<F>(
        &self,
        universe: &[Symbol],
        on_progress: F,
    ) -> Result<RefreshReport, StockPulseError>
    where
        F: FnMut(usize, &Symbol, &SymbolOutcome),
    {
        tracing::info!("Refreshing {} symbols", universe.len());
        let batch = self
            .fetcher
            .fetch_all_with_progress(universe, on_progress)
            .await;

        let now = self.clock.now();
        let mut created = 0;
        let mut updated = 0;
        for quote in batch.quotes() {
            match self.db.upsert_quote(quote, now)? {
                WriteKind::Created => created += 1,
                WriteKind::Updated => updated += 1,
            }
        }

        let summary = summarize(batch.quotes(), now);
        self.db.upsert_summary(&summary)?;
        self.db.set_meta(LAST_REFRESH_KEY, &now.to_rfc3339())?;

        let failed: Vec<(Symbol, String)> = batch
            .failures()
            .map(|(s, e)| (s.clone(), e.to_string()))
            .collect();
        for (symbol, reason) in &failed {
            tracing::debug!("{} not refreshed: {}", symbol, reason);
        }
        tracing::info!(
            "Refresh complete: {} fetched ({} created, {} updated), {} failed; {} gainers, {} losers, {} unchanged",
            summary.total_symbols,
            created,
            updated,
            failed.len(),
            summary.gainers,
            summary.losers,
            summary.unchanged
        );

        Ok(RefreshReport {
            requested: universe.len(),
            fetched: summary.total_symbols,
            failed,
            created,
            updated,
            summary,
            requests: batch.requests,
        })
    }
}

/// True if the stored summary is missing or older than `max_age`.
pub fn is_stale(db: &Db, max_age: Duration, now: DateTime<Utc>) -> Result<bool, StockPulseError> {
    let Some(summary) = db.get_summary()? else {
        return Ok(true);
    };
    let age = now.signed_duration_since(summary.last_updated_at);
    Ok(age.to_std().map_or(false, |age| age >= max_age))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BULK_FRESHNESS;
    use crate::clock::ManualClock;
    use crate::quotes::{Quote, QuotePrices, QuoteSource};
    use crate::rate_limiter::RateLimiter;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MapSource {
        prices: Mutex<HashMap<String, (f64, f64)>>,
    }

    #[async_trait]
    impl QuoteSource for MapSource {
        async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, finnhub_api::Error> {
            let prices = self.prices.lock().unwrap();
            let (current, prev) = prices
                .get(symbol.as_str())
                .copied()
                .ok_or(finnhub_api::Error::NotFound)?;
            Ok(Quote::from_prices(
                symbol.clone(),
                QuotePrices {
                    current,
                    open: prev,
                    high: current.max(prev),
                    low: current.min(prev),
                    previous_close: prev,
                },
                0,
            ))
        }
    }

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn setup(prices: &[(&str, f64, f64)]) -> (Arc<Db>, Arc<MapSource>, Arc<ManualClock>, MarketDataRefreshJob) {
        let db = Arc::new(Db::open_in_memory().unwrap());
        db.init().unwrap();
        let source = Arc::new(MapSource {
            prices: Mutex::new(
                prices
                    .iter()
                    .map(|(s, c, p)| (s.to_string(), (*c, *p)))
                    .collect(),
            ),
        });
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 3, 15, 0, 0).unwrap(),
        ));
        let limiter = Arc::new(RateLimiter::new(1000, Duration::from_secs(60), Duration::ZERO));
        let fetcher = BatchFetcher::new(source.clone(), limiter);
        let job = MarketDataRefreshJob::new(db.clone(), fetcher, clock.clone());
        (db, source, clock, job)
    }

    #[tokio::test]
    async fn first_run_creates_then_second_updates() {
        let (db, source, _clock, job) = setup(&[("AAPL", 101.0, 100.0), ("MSFT", 98.0, 100.0)]);
        let universe = vec![sym("AAPL"), sym("MSFT")];

        let first = job.run(&universe).await.unwrap();
        assert_eq!((first.created, first.updated), (2, 0));

        source.prices.lock().unwrap().insert("AAPL".into(), (102.0, 100.0));
        let second = job.run(&universe).await.unwrap();
        assert_eq!((second.created, second.updated), (0, 2));
        assert_eq!(
            db.get_quote(&sym("AAPL")).unwrap().unwrap().current_price,
            102.0
        );
    }

    #[tokio::test]
    async fn summary_counts_only_successful_fetches() {
        let (db, _source, _clock, job) = setup(&[("AAPL", 101.0, 100.0), ("MSFT", 98.0, 100.0)]);
        let report = job
            .run(&[sym("AAPL"), sym("MSFT"), sym("GONE")])
            .await
            .unwrap();

        assert_eq!(report.requested, 3);
        assert_eq!(report.fetched, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, sym("GONE"));
        let stored = db.get_summary().unwrap().unwrap();
        assert_eq!(stored.total_symbols, 2);
        assert_eq!((stored.gainers, stored.losers, stored.unchanged), (1, 1, 0));
        assert!(db.get_meta(LAST_REFRESH_KEY).unwrap().is_some());
    }

    #[tokio::test]
    async fn store_failure_aborts_the_run() {
        let db = Arc::new(Db::open_in_memory().unwrap());
        // schema never initialised
        let source = Arc::new(MapSource {
            prices: Mutex::new(HashMap::from([("AAPL".to_string(), (1.0, 1.0))])),
        });
        let limiter = Arc::new(RateLimiter::new(10, Duration::from_secs(60), Duration::ZERO));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let job = MarketDataRefreshJob::new(db, BatchFetcher::new(source, limiter), clock);
        assert!(matches!(
            job.run(&[sym("AAPL")]).await,
            Err(StockPulseError::Db(_))
        ));
    }

    #[tokio::test]
    async fn staleness_tracks_summary_age() {
        let (db, _source, clock, job) = setup(&[("AAPL", 101.0, 100.0)]);
        assert!(is_stale(&db, BULK_FRESHNESS, clock.now()).unwrap());

        job.run(&[sym("AAPL")]).await.unwrap();
        assert!(!is_stale(&db, BULK_FRESHNESS, clock.now()).unwrap());

        clock.advance(chrono::Duration::minutes(29));
        assert!(!is_stale(&db, BULK_FRESHNESS, clock.now()).unwrap());
        clock.advance(chrono::Duration::minutes(1));
        assert!(is_stale(&db, BULK_FRESHNESS, clock.now()).unwrap());
    }
}
