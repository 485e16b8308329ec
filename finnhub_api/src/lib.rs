//! Typed client for the Finnhub market-data REST API.
//!
//! Only the endpoints the pipeline needs are covered: real-time quotes,
//! company profiles, and daily candles. The client performs exactly one HTTP call per
//! request and never retries; pacing and retry policy belong to the caller.

mod client;
mod errors;
mod query;
pub mod types;
pub use self::client::{Client, DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
pub use self::errors::Error;
pub use self::query::{CandleQuery, Query, SymbolQuery};
