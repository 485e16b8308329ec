//! Library layer for StockPulse: quote fetching under a rate budget, the
//! SQLite store and work queue, and the daily analysis pipeline.
//!
//! Wraps the `finnhub_api` crate with an in-memory TTL cache, a rolling-window
//! rate limiter, and the scheduled jobs that turn fetched quotes into one
//! recommendation email per opted-in user.

pub mod advisor;
pub mod batch;
pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod mailer;
pub mod market;
pub mod models;
pub mod orchestrator;
pub mod projection;
pub mod queue;
pub mod quotes;
pub mod rate_limiter;
pub mod refresh;
pub mod stats;
pub mod symbols;
pub mod trend;
pub mod worker;

pub use finnhub_api;

pub use batch::{BatchFetcher, BatchReport, FailurePolicy, SymbolOutcome};
pub use cache::{CachedQuoteSource, QuoteCache};
pub use clock::{Clock, SystemClock};
pub use config::Settings;
pub use db::{Db, DbError};
pub use error::StockPulseError;
pub use orchestrator::DailyAnalysisOrchestrator;
pub use queue::{AnalysisQueue, AnalysisTask, QueueConfig, QueueError};
pub use quotes::{FinnhubSource, Quote, QuoteSource};
pub use rate_limiter::RateLimiter;
pub use refresh::MarketDataRefreshJob;
pub use symbols::Symbol;
pub use worker::{drain_queue, DailyAnalysisWorker, DrainOptions};
