//! Error types for the library layer.

use std::fmt;

use crate::advisor::AdvisorError;
use crate::db::DbError;
use crate::mailer::MailError;
use crate::queue::QueueError;

/// Top-level error for pipeline runs, wrapping the per-module errors.
#[derive(Debug)]
pub enum StockPulseError {
    /// An error from the market-data client.
    Api(finnhub_api::Error),
    /// The persisted store could not be read or written.
    Db(DbError),
    /// The work queue could not be read or written.
    Queue(QueueError),
    /// The advisor (LLM) call failed in a way that was not handled by the fallback.
    Advisor(AdvisorError),
    /// The summary email could not be delivered.
    Mail(MailError),
    /// User-provided input failed validation.
    InvalidInput(String),
    /// A required setting is missing or malformed.
    Config(String),
    /// A bounded operation ran past its deadline.
    Timeout(String),
    /// A spawned or blocking task did not run to completion.
    Task(String),
}

impl fmt::Display for StockPulseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api(e) => write!(f, "API error: {}", e),
            Self::Db(e) => write!(f, "Store error: {}", e),
            Self::Queue(e) => write!(f, "Queue error: {}", e),
            Self::Advisor(e) => write!(f, "Advisor error: {}", e),
            Self::Mail(e) => write!(f, "Mail error: {}", e),
            Self::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::Timeout(msg) => write!(f, "Timed out: {}", msg),
            Self::Task(msg) => write!(f, "Task failed: {}", msg),
        }
    }
}

impl std::error::Error for StockPulseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Api(e) => Some(e),
            Self::Db(e) => Some(e),
            Self::Queue(e) => Some(e),
            Self::Advisor(e) => Some(e),
            Self::Mail(e) => Some(e),
            _ => None,
        }
    }
}

impl From<finnhub_api::Error> for StockPulseError {
    fn from(e: finnhub_api::Error) -> Self {
        Self::Api(e)
    }
}

impl From<DbError> for StockPulseError {
    fn from(e: DbError) -> Self {
        Self::Db(e)
    }
}

impl From<QueueError> for StockPulseError {
    fn from(e: QueueError) -> Self {
        Self::Queue(e)
    }
}

impl From<AdvisorError> for StockPulseError {
    fn from(e: AdvisorError) -> Self {
        Self::Advisor(e)
    }
}

impl From<MailError> for StockPulseError {
    fn from(e: MailError) -> Self {
        Self::Mail(e)
    }
}
