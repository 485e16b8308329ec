//! Runtime settings from the process environment (and `.env`).

use std::fmt;
use std::time::Duration;

use crate::advisor::client::{DEFAULT_BASE_URL as LLM_DEFAULT_BASE_URL, DEFAULT_MODEL as LLM_DEFAULT_MODEL};
use crate::error::StockPulseError;
use crate::mailer::{SmtpConfig, SmtpTls};
use crate::queue::QueueConfig;
use crate::rate_limiter::{DEFAULT_MAX_REQUESTS, DEFAULT_MIN_INTERVAL};
use crate::worker::DEFAULT_CONCURRENCY;

pub const DEFAULT_DB_PATH: &str = "stockpulse.db";

#[derive(Clone)]
pub struct Settings {
    pub finnhub_api_key: Option<String>,
    pub finnhub_base_url: String,
    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub llm_model: String,
    pub db_path: String,
    pub fetch_interval: Duration,
    /// Upper bound of the random extra delay after each batch call.
    pub fetch_jitter: Duration,
    pub calls_per_minute: u64,
    pub worker_concurrency: usize,
    pub queue: QueueConfig,
    /// `None` when `SMTP_HOST` is unset; emails are then only logged.
    pub smtp: Option<SmtpConfig>,
}

// Keeps keys out of logs.
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("Settings")
            .field("finnhub_api_key", &redact(&self.finnhub_api_key))
            .field("finnhub_base_url", &self.finnhub_base_url)
            .field("llm_api_key", &redact(&self.llm_api_key))
            .field("llm_base_url", &self.llm_base_url)
            .field("llm_model", &self.llm_model)
            .field("db_path", &self.db_path)
            .field("fetch_interval", &self.fetch_interval)
            .field("fetch_jitter", &self.fetch_jitter)
            .field("calls_per_minute", &self.calls_per_minute)
            .field("worker_concurrency", &self.worker_concurrency)
            .field("queue", &self.queue)
            .field("smtp", &self.smtp)
            .finish()
    }
}

impl Settings {
    /// Loads `.env` if present, then reads the environment.
    pub fn from_env() -> Result<Self, StockPulseError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, StockPulseError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let env_u64 = |key: &str, default: u64| get(key).and_then(|v| v.parse::<u64>().ok()).unwrap_or(default);
        let env_usize =
            |key: &str, default: usize| get(key).and_then(|v| v.parse::<usize>().ok()).unwrap_or(default);

        let defaults = QueueConfig::default();
        let queue = QueueConfig {
            visibility_timeout: Duration::from_secs(env_u64(
                "STOCKPULSE_VISIBILITY_TIMEOUT_SECS",
                defaults.visibility_timeout.as_secs(),
            )),
            max_receive_count: u32::try_from(env_u64(
                "STOCKPULSE_MAX_RECEIVE_COUNT",
                u64::from(defaults.max_receive_count),
            ))
            .unwrap_or(defaults.max_receive_count)
            .max(1),
            ..defaults
        };

        let smtp = match get("SMTP_HOST") {
            None => None,
            Some(host) => {
                let tls = match get("SMTP_TLS") {
                    Some(mode) => mode.parse::<SmtpTls>().map_err(StockPulseError::Config)?,
                    None => SmtpTls::default(),
                };
                let default_port = match tls {
                    SmtpTls::Tls => 465,
                    SmtpTls::StartTls => 587,
                    SmtpTls::None => 25,
                };
                let port = match get("SMTP_PORT") {
                    Some(p) => p
                        .parse::<u16>()
                        .map_err(|_| StockPulseError::Config(format!("SMTP_PORT is not a port: {}", p)))?,
                    None => default_port,
                };
                let from_address = get("SMTP_FROM_ADDRESS").ok_or_else(|| {
                    StockPulseError::Config("SMTP_FROM_ADDRESS is required when SMTP_HOST is set".into())
                })?;
                Some(SmtpConfig {
                    host,
                    port,
                    username: get("SMTP_USERNAME"),
                    password: get("SMTP_PASSWORD"),
                    from_address,
                    tls,
                })
            }
        };

        let interval_default = u64::try_from(DEFAULT_MIN_INTERVAL.as_millis()).unwrap_or(1100);
        Ok(Self {
            finnhub_api_key: get("FINNHUB_API_KEY"),
            finnhub_base_url: get("FINNHUB_BASE_URL")
                .unwrap_or_else(|| finnhub_api::DEFAULT_BASE_URL.to_string()),
            llm_api_key: get("LLM_API_KEY"),
            llm_base_url: get("LLM_BASE_URL").unwrap_or_else(|| LLM_DEFAULT_BASE_URL.to_string()),
            llm_model: get("LLM_MODEL").unwrap_or_else(|| LLM_DEFAULT_MODEL.to_string()),
            db_path: get("STOCKPULSE_DB").unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            fetch_interval: Duration::from_millis(env_u64("STOCKPULSE_FETCH_INTERVAL_MS", interval_default)),
            fetch_jitter: Duration::from_millis(env_u64("STOCKPULSE_FETCH_JITTER_MS", 0)),
            calls_per_minute: env_u64("STOCKPULSE_CALLS_PER_MINUTE", DEFAULT_MAX_REQUESTS).max(1),
            worker_concurrency: env_usize("STOCKPULSE_WORKER_CONCURRENCY", DEFAULT_CONCURRENCY).max(1),
            queue,
            smtp,
        })
    }

    /// The market-data key, or a config error naming the variable.
    pub fn require_finnhub_key(&self) -> Result<&str, StockPulseError> {
        self.finnhub_api_key
            .as_deref()
            .ok_or_else(|| StockPulseError::Config("FINNHUB_API_KEY is not set".into()))
    }
}
