//! In-memory quote cache backed by `DashMap` for concurrent access.
//!
//! The bulk refresh writes through to the cache, and interactive reads fall
//! back to the store when its copy is younger than [`BULK_FRESHNESS`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::clock::Clock;
use crate::db::Db;
use crate::quotes::{Quote, QuoteSource};
use crate::symbols::Symbol;

/// TTL for interactive single-symbol lookups.
pub const INTERACTIVE_TTL: Duration = Duration::from_secs(60);

/// Maximum age at which a bulk refresh is still considered current.
pub const BULK_FRESHNESS: Duration = Duration::from_secs(30 * 60);

/// A cached quote with the time it was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub quote: Quote,
    pub inserted_at_epoch_millis: i64,
}

impl CacheEntry {
    /// True iff `now - inserted_at < ttl`. An entry is stale at exactly `ttl`.
    pub fn is_fresh_at(&self, ttl: Duration, now_epoch_millis: i64) -> bool {
        let age = now_epoch_millis - self.inserted_at_epoch_millis;
        age < ttl.as_millis() as i64
    }
}

/// Thread-safe quote cache with time-to-live expiration.
///
/// Expired entries are lazily evicted on the next `get` for that symbol;
/// there is no background sweep. Concurrent writers to the same symbol are
/// last-write-wins.
pub struct QuoteCache {
    store: DashMap<Symbol, CacheEntry>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl QuoteCache {
    /// Creates a new cache with the given time-to-live for entries.
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: DashMap::new(),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached entry for `symbol`, or `None` if missing or expired.
    pub fn get(&self, symbol: &Symbol) -> Option<CacheEntry> {
        let now = self.clock.now_millis();
        let entry = self.store.get(symbol)?;
        if entry.is_fresh_at(self.ttl, now) {
            return Some(entry.clone());
        }
        drop(entry);
        // Only drop it if nobody refreshed the slot in the meantime.
        self.store
            .remove_if(symbol, |_, e| !e.is_fresh_at(self.ttl, now));
        None
    }

    /// Returns whatever is stored for `symbol`, fresh or not, without evicting.
    pub fn peek(&self, symbol: &Symbol) -> Option<CacheEntry> {
        self.store.get(symbol).map(|e| e.clone())
    }

    /// Inserts or overwrites the entry for `symbol`.
    pub fn put(&self, symbol: Symbol, quote: Quote) {
        self.store.insert(
            symbol,
            CacheEntry {
                quote,
                inserted_at_epoch_millis: self.clock.now_millis(),
            },
        );
    }

    /// Inserts with an explicit insertion time, e.g. a stored quote's fetch time.
    pub fn put_at(&self, symbol: Symbol, quote: Quote, inserted_at_epoch_millis: i64) {
        self.store.insert(
            symbol,
            CacheEntry {
                quote,
                inserted_at_epoch_millis,
            },
        );
    }

    /// Loads quotes aged by their own fetch time, so old rows are only
    /// visible through [`peek`](Self::peek).
    pub fn warm_from(&self, quotes: impl IntoIterator<Item = Quote>) -> usize {
        let mut n = 0;
        for quote in quotes {
            let at = quote.fetched_at_epoch_seconds.saturating_mul(1000);
            self.put_at(quote.symbol.clone(), quote, at);
            n += 1;
        }
        n
    }

    /// Freshness check against an arbitrary TTL using this cache's clock.
    pub fn is_fresh(&self, entry: &CacheEntry, ttl: Duration) -> bool {
        entry.is_fresh_at(ttl, self.clock.now_millis())
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Removes all entries from the cache.
    pub fn clear(&self) {
        self.store.clear();
    }
}

/// Read-through wrapper: serves fresh cache hits, then (if configured) a
/// recently refreshed stored quote, otherwise calls the inner source and
/// stores the result. Failures are never cached.
pub struct CachedQuoteSource<S> {
    inner: S,
    cache: Arc<QuoteCache>,
    store: Option<(Arc<Db>, Duration)>,
}

impl<S: QuoteSource> CachedQuoteSource<S> {
    pub fn new(inner: S, cache: Arc<QuoteCache>) -> Self {
        Self {
            inner,
            cache,
            store: None,
        }
    }

    /// Serve stored quotes fetched less than `max_age` ago without an API call.
    pub fn with_store(mut self, db: Arc<Db>, max_age: Duration) -> Self {
        self.store = Some((db, max_age));
        self
    }

    fn from_store(&self, symbol: &Symbol) -> Option<Quote> {
        let (db, max_age) = self.store.as_ref()?;
        let quote = match db.get_quote(symbol) {
            Ok(found) => found?,
            Err(e) => {
                tracing::warn!("Stored quote lookup failed for {}: {}", symbol, e);
                return None;
            }
        };
        let entry = CacheEntry {
            inserted_at_epoch_millis: quote.fetched_at_epoch_seconds.saturating_mul(1000),
            quote,
        };
        self.cache.is_fresh(&entry, *max_age).then_some(entry.quote)
    }

    pub fn cache(&self) -> &QuoteCache {
        &self.cache
    }
}

#[async_trait]
impl<S: QuoteSource> QuoteSource for CachedQuoteSource<S> {
    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, finnhub_api::Error> {
        if let Some(hit) = self.cache.get(symbol) {
            tracing::debug!("cache hit for {}", symbol);
            return Ok(hit.quote);
        }
        if let Some(stored) = self.from_store(symbol) {
            tracing::debug!("serving {} from the last refresh", symbol);
            return Ok(stored);
        }
        let quote = self.inner.fetch_quote(symbol).await?;
        self.cache.put(symbol.clone(), quote.clone());
        Ok(quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::quotes::QuotePrices;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn quote(s: &str, price: f64) -> Quote {
        Quote::from_prices(
            sym(s),
            QuotePrices {
                current: price,
                open: price,
                high: price,
                low: price,
                previous_close: 100.0,
            },
            0,
        )
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 3, 15, 0, 0).unwrap(),
        ))
    }

    #[test]
    fn cache_put_and_get() {
        let cache = QuoteCache::new(INTERACTIVE_TTL, clock());
        cache.put(sym("AAPL"), quote("AAPL", 101.0));
        assert_eq!(cache.get(&sym("AAPL")).unwrap().quote.current_price, 101.0);
    }

    #[test]
    fn cache_miss() {
        let cache = QuoteCache::new(INTERACTIVE_TTL, clock());
        assert!(cache.get(&sym("NOPE")).is_none());
    }

    #[test]
    fn freshness_boundary_is_exclusive() {
        let entry = CacheEntry {
            quote: quote("AAPL", 1.0),
            inserted_at_epoch_millis: 1_000,
        };
        let ttl = Duration::from_secs(60);
        assert!(entry.is_fresh_at(ttl, 1_000));
        assert!(entry.is_fresh_at(ttl, 60_999));
        assert!(!entry.is_fresh_at(ttl, 61_000));
        assert!(!entry.is_fresh_at(ttl, 61_001));
    }

    #[test]
    fn expired_entries_are_evicted_on_read() {
        let clock = clock();
        let cache = QuoteCache::new(INTERACTIVE_TTL, clock.clone());
        cache.put(sym("AAPL"), quote("AAPL", 1.0));

        clock.advance(chrono::Duration::seconds(59));
        assert!(cache.get(&sym("AAPL")).is_some());

        clock.advance(chrono::Duration::seconds(1));
        assert!(cache.get(&sym("AAPL")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn peek_returns_stale_entries() {
        let clock = clock();
        let cache = QuoteCache::new(INTERACTIVE_TTL, clock.clone());
        cache.put(sym("AAPL"), quote("AAPL", 1.0));
        clock.advance(chrono::Duration::minutes(10));
        let entry = cache.peek(&sym("AAPL")).unwrap();
        assert!(!cache.is_fresh(&entry, INTERACTIVE_TTL));
        assert!(cache.is_fresh(&entry, BULK_FRESHNESS));
    }

    #[test]
    fn cache_overwrite_is_last_write_wins() {
        let cache = QuoteCache::new(INTERACTIVE_TTL, clock());
        cache.put(sym("AAPL"), quote("AAPL", 1.0));
        cache.put(sym("AAPL"), quote("AAPL", 2.0));
        assert_eq!(cache.get(&sym("AAPL")).unwrap().quote.current_price, 2.0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_clear() {
        let cache = QuoteCache::new(INTERACTIVE_TTL, clock());
        cache.put(sym("A"), quote("A", 1.0));
        cache.put(sym("B"), quote("B", 2.0));
        cache.clear();
        assert!(cache.get(&sym("A")).is_none());
        assert!(cache.get(&sym("B")).is_none());
    }

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QuoteSource for CountingSource {
        async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, finnhub_api::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if symbol.as_str() == "FAIL" {
                return Err(finnhub_api::Error::Timeout);
            }
            Ok(quote(symbol.as_str(), 150.0))
        }
    }

    #[tokio::test]
    async fn read_through_hits_upstream_once_per_ttl() {
        let clock = clock();
        let cache = Arc::new(QuoteCache::new(INTERACTIVE_TTL, clock.clone()));
        let source = CachedQuoteSource::new(
            CountingSource {
                calls: AtomicUsize::new(0),
            },
            cache,
        );

        source.fetch_quote(&sym("AAPL")).await.unwrap();
        source.fetch_quote(&sym("AAPL")).await.unwrap();
        assert_eq!(source.inner.calls.load(Ordering::SeqCst), 1);

        clock.advance(chrono::Duration::seconds(60));
        source.fetch_quote(&sym("AAPL")).await.unwrap();
        assert_eq!(source.inner.calls.load(Ordering::SeqCst), 2);
    }

    fn quote_fetched_at(s: &str, price: f64, at: chrono::DateTime<Utc>) -> Quote {
        Quote::from_prices(
            sym(s),
            QuotePrices {
                current: price,
                open: price,
                high: price,
                low: price,
                previous_close: 100.0,
            },
            at.timestamp(),
        )
    }

    #[tokio::test]
    async fn recent_bulk_refresh_serves_interactive_reads() {
        let clock = clock();
        let db = Arc::new(Db::open_in_memory().unwrap());
        db.init().unwrap();
        let refreshed_at = clock.now() - chrono::Duration::minutes(10);
        db.create_quote(&quote_fetched_at("AAPL", 190.0, refreshed_at), refreshed_at)
            .unwrap();
        let stale_at = clock.now() - chrono::Duration::minutes(30);
        db.create_quote(&quote_fetched_at("MSFT", 410.0, stale_at), stale_at)
            .unwrap();

        let source = CachedQuoteSource::new(
            CountingSource {
                calls: AtomicUsize::new(0),
            },
            Arc::new(QuoteCache::new(INTERACTIVE_TTL, clock.clone())),
        )
        .with_store(db, BULK_FRESHNESS);

        let aapl = source.fetch_quote(&sym("AAPL")).await.unwrap();
        assert_eq!(aapl.current_price, 190.0);
        assert_eq!(source.inner.calls.load(Ordering::SeqCst), 0);

        // exactly 30 minutes old is no longer fresh
        let msft = source.fetch_quote(&sym("MSFT")).await.unwrap();
        assert_eq!(msft.current_price, 150.0);
        assert_eq!(source.inner.calls.load(Ordering::SeqCst), 1);

        // not stored at all
        source.fetch_quote(&sym("NVDA")).await.unwrap();
        assert_eq!(source.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn warmed_entries_keep_their_fetch_age() {
        let clock = clock();
        let cache = QuoteCache::new(INTERACTIVE_TTL, clock.clone());
        let old = clock.now() - chrono::Duration::minutes(5);
        let n = cache.warm_from(vec![quote_fetched_at("AAPL", 1.0, old)]);
        assert_eq!(n, 1);
        assert!(cache.peek(&sym("AAPL")).is_some());
        assert!(cache.get(&sym("AAPL")).is_none());
    }

    #[tokio::test]
    async fn read_through_does_not_cache_failures() {
        let cache = Arc::new(QuoteCache::new(INTERACTIVE_TTL, clock()));
        let source = CachedQuoteSource::new(
            CountingSource {
                calls: AtomicUsize::new(0),
            },
            cache,
        );
        assert!(source.fetch_quote(&sym("FAIL")).await.is_err());
        assert!(source.fetch_quote(&sym("FAIL")).await.is_err());
        assert_eq!(source.inner.calls.load(Ordering::SeqCst), 2);
        assert!(source.cache().is_empty());
    }
}
