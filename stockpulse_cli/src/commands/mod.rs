//! CLI subcommand implementations.

pub mod candles;
pub mod dlq;
pub mod history;
pub mod market;
pub mod orchestrate;
pub mod prefs;
pub mod profile;
pub mod project;
pub mod quote;
pub mod refresh;
pub mod schedule;
pub mod work;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use stockpulse_lib::advisor::{Advisor, ChatAdvisor};
use stockpulse_lib::cache::INTERACTIVE_TTL;
use stockpulse_lib::mailer::{DryRunMailer, Mailer, SmtpMailer};
use stockpulse_lib::rate_limiter::DEFAULT_WINDOW;
use stockpulse_lib::{
    AnalysisQueue, Clock, DailyAnalysisWorker, Db, FinnhubSource, QuoteCache, RateLimiter, Settings,
    SystemClock,
};

use crate::output::OutputFormat;

/// Settings and shared handles for one invocation.
pub struct Context {
    pub settings: Settings,
    pub db_path: PathBuf,
    pub format: OutputFormat,
    pub clock: Arc<dyn Clock>,
    /// Filled by refreshes in this process and read by interactive lookups.
    pub quote_cache: Arc<QuoteCache>,
}

impl Context {
    pub fn new(settings: Settings, db: Option<PathBuf>, format: OutputFormat) -> Self {
        let db_path = db.unwrap_or_else(|| PathBuf::from(&settings.db_path));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            settings,
            db_path,
            format,
            quote_cache: Arc::new(QuoteCache::new(INTERACTIVE_TTL, clock.clone())),
            clock,
        }
    }

    pub fn open_db(&self) -> Result<Arc<Db>> {
        let db = Db::open(&self.db_path)?;
        db.init()?;
        Ok(Arc::new(db))
    }

    pub fn open_queue(&self) -> Result<Arc<AnalysisQueue>> {
        let queue = AnalysisQueue::open(&self.db_path, self.settings.queue.clone(), self.clock.clone())?;
        queue.init()?;
        Ok(Arc::new(queue))
    }

    pub fn quote_source(&self) -> Result<FinnhubSource> {
        let key = self.settings.require_finnhub_key()?;
        let client = stockpulse_lib::finnhub_api::Client::with_base_url(
            &self.settings.finnhub_base_url,
            key.to_string(),
        )?;
        Ok(FinnhubSource::new(client, self.clock.clone()))
    }

    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(
            self.settings.calls_per_minute,
            DEFAULT_WINDOW,
            self.settings.fetch_interval,
        ))
    }

    /// `None` without `LLM_API_KEY`; the worker then uses rule-based advice only.
    pub fn advisor(&self) -> Result<Option<Arc<dyn Advisor>>> {
        let Some(advisor) = self.chat_advisor()? else {
            eprintln!("Note: LLM_API_KEY not set; recommendations will be rule-based.");
            return Ok(None);
        };
        Ok(Some(Arc::new(advisor)))
    }

    pub fn chat_advisor(&self) -> Result<Option<ChatAdvisor>> {
        let Some(key) = self.settings.llm_api_key.clone() else {
            return Ok(None);
        };
        let advisor = ChatAdvisor::with_base_url(
            &self.settings.llm_base_url,
            key,
            &self.settings.llm_model,
            stockpulse_lib::advisor::client::DEFAULT_TIMEOUT,
        )?;
        Ok(Some(advisor))
    }

    pub fn mailer(&self) -> Result<Arc<dyn Mailer>> {
        match &self.settings.smtp {
            Some(smtp) => Ok(Arc::new(SmtpMailer::new(smtp)?)),
            None => {
                eprintln!("Note: SMTP_HOST not set; emails will be logged, not sent.");
                Ok(Arc::new(DryRunMailer))
            }
        }
    }

    pub fn worker(&self, db: Arc<Db>) -> Result<DailyAnalysisWorker> {
        Ok(DailyAnalysisWorker::new(
            db,
            self.advisor()?,
            self.mailer()?,
            self.clock.clone(),
        ))
    }
}
