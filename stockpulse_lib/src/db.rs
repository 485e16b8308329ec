//! SQLite storage for quotes, the market summary, user preferences, and
//! analysis history.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::advisor::{Action, RecommendationSource, RiskLevel};
use crate::market::{MarketStatus, MarketSummaryRecord};
use crate::models::{AlertPreferences, AnalysisHistoryRecord, Page, UserPreference};
use crate::quotes::{Quote, QuotePrices};
use crate::stats::Mover;
use crate::symbols::Symbol;

/// Current schema version stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i32 = 1;

#[derive(thiserror::Error, Debug)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("date parse error: {0}")]
    Date(#[from] chrono::ParseError),
    #[error("no {kind} with key {key}")]
    Missing { kind: &'static str, key: String },
    #[error("invalid stored value: {0}")]
    Invalid(String),
}

/// Whether an upsert inserted a new row or overwrote an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Created,
    Updated,
}

/// Connection wrapper. Methods take `&self` so one `Arc<Db>` can be shared by
/// concurrent workers; statements are serialized on an internal mutex.
pub struct Db {
    conn: Mutex<Connection>,
}

pub(crate) fn apply_pragmas(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )
}

/// Brings the schema up to date. Shared with the queue, which may open the
/// same file on its own connection.
pub(crate) fn init_schema(conn: &Connection) -> Result<(), DbError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    let schema = include_str!("../../schema/sqlite.sql");
    conn.execute_batch(schema)?;
    if version < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(())
}

impl Db {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        apply_pragmas(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn init(&self) -> Result<(), DbError> {
        init_schema(&self.conn())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>, DbError> {
        self.conn()
            .query_row(
                "SELECT value FROM ingest_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(DbError::from)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<(), DbError> {
        self.conn().execute(
            "INSERT INTO ingest_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Quotes
    // ------------------------------------------------------------------

    pub fn get_quote(&self, symbol: &Symbol) -> Result<Option<Quote>, DbError> {
        let row = self
            .conn()
            .query_row(
                "SELECT symbol, current_price, open_price, high_price, low_price,
                        previous_close, fetched_at
                 FROM quotes WHERE symbol = ?1",
                params![symbol.as_str()],
                QuoteRow::from_row,
            )
            .optional()?;
        row.map(QuoteRow::into_quote).transpose()
    }

    /// Looks up each symbol; missing ones are skipped. Result follows input order.
    pub fn get_quotes(&self, symbols: &[Symbol]) -> Result<Vec<Quote>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT symbol, current_price, open_price, high_price, low_price,
                    previous_close, fetched_at
             FROM quotes WHERE symbol = ?1",
        )?;
        let mut out = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            if let Some(row) = stmt
                .query_row(params![symbol.as_str()], QuoteRow::from_row)
                .optional()?
            {
                out.push(row.into_quote()?);
            }
        }
        Ok(out)
    }

    pub fn list_quotes(&self) -> Result<Vec<Quote>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT symbol, current_price, open_price, high_price, low_price,
                    previous_close, fetched_at
             FROM quotes ORDER BY symbol",
        )?;
        let rows = stmt.query_map([], QuoteRow::from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_quote()?);
        }
        Ok(out)
    }

    /// Inserts a quote that must not exist yet.
    pub fn create_quote(&self, quote: &Quote, now: DateTime<Utc>) -> Result<(), DbError> {
        let ts = now.to_rfc3339();
        self.conn().execute(
            "INSERT INTO quotes (
               symbol, current_price, open_price, high_price, low_price,
               previous_close, change_abs, change_pct, fetched_at, created_at, updated_at
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                quote.symbol.as_str(),
                quote.current_price,
                quote.open_price,
                quote.high_price,
                quote.low_price,
                quote.previous_close,
                quote.change_abs,
                quote.change_pct,
                quote.fetched_at_epoch_seconds,
                ts,
            ],
        )?;
        Ok(())
    }

    /// Overwrites an existing quote. Fails with [`DbError::Missing`] if absent.
    pub fn update_quote(&self, quote: &Quote, now: DateTime<Utc>) -> Result<(), DbError> {
        let changed = self.conn().execute(
            "UPDATE quotes SET
               current_price = ?2,
               open_price = ?3,
               high_price = ?4,
               low_price = ?5,
               previous_close = ?6,
               change_abs = ?7,
               change_pct = ?8,
               fetched_at = ?9,
               updated_at = ?10
             WHERE symbol = ?1",
            params![
                quote.symbol.as_str(),
                quote.current_price,
                quote.open_price,
                quote.high_price,
                quote.low_price,
                quote.previous_close,
                quote.change_abs,
                quote.change_pct,
                quote.fetched_at_epoch_seconds,
                now.to_rfc3339(),
            ],
        )?;
        if changed == 0 {
            return Err(DbError::Missing {
                kind: "quote",
                key: quote.symbol.to_string(),
            });
        }
        Ok(())
    }

    /// Look up by key, then create or update.
    pub fn upsert_quote(&self, quote: &Quote, now: DateTime<Utc>) -> Result<WriteKind, DbError> {
        if self.quote_exists(&quote.symbol)? {
            self.update_quote(quote, now)?;
            Ok(WriteKind::Updated)
        } else {
            self.create_quote(quote, now)?;
            Ok(WriteKind::Created)
        }
    }

    fn quote_exists(&self, symbol: &Symbol) -> Result<bool, DbError> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM quotes WHERE symbol = ?1",
                params![symbol.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn quote_count(&self) -> Result<i64, DbError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(1) FROM quotes", [], |row| row.get(0))?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Market summary
    // ------------------------------------------------------------------

    pub fn upsert_summary(&self, summary: &MarketSummaryRecord) -> Result<(), DbError> {
        self.conn().execute(
            "INSERT INTO market_summary (
               id, total_symbols, gainers, losers, unchanged, last_updated_at, market_status
             )
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
               total_symbols = excluded.total_symbols,
               gainers = excluded.gainers,
               losers = excluded.losers,
               unchanged = excluded.unchanged,
               last_updated_at = excluded.last_updated_at,
               market_status = excluded.market_status",
            params![
                summary.total_symbols as i64,
                summary.gainers as i64,
                summary.losers as i64,
                summary.unchanged as i64,
                summary.last_updated_at.to_rfc3339(),
                summary.market_status.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn get_summary(&self) -> Result<Option<MarketSummaryRecord>, DbError> {
        let row: Option<(i64, i64, i64, i64, String, String)> = self
            .conn()
            .query_row(
                "SELECT total_symbols, gainers, losers, unchanged, last_updated_at, market_status
                 FROM market_summary WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;
        let Some((total, gainers, losers, unchanged, updated, status)) = row else {
            return Ok(None);
        };
        Ok(Some(MarketSummaryRecord {
            total_symbols: total as usize,
            gainers: gainers as usize,
            losers: losers as usize,
            unchanged: unchanged as usize,
            last_updated_at: parse_ts(&updated)?,
            market_status: status.parse::<MarketStatus>().map_err(DbError::Invalid)?,
        }))
    }

    // ------------------------------------------------------------------
    // User preferences
    // ------------------------------------------------------------------

    pub fn save_preference(&self, pref: &UserPreference, now: DateTime<Utc>) -> Result<(), DbError> {
        let symbols = serde_json::to_string(&pref.selected_symbols)?;
        let alerts = pref
            .alert_preferences
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn().execute(
            "INSERT INTO user_preferences (
               user_id, email, selected_symbols, daily_insights_opt_in,
               last_analysis_date, alert_preferences, updated_at
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id) DO UPDATE SET
               email = excluded.email,
               selected_symbols = excluded.selected_symbols,
               daily_insights_opt_in = excluded.daily_insights_opt_in,
               last_analysis_date = COALESCE(excluded.last_analysis_date, user_preferences.last_analysis_date),
               alert_preferences = excluded.alert_preferences,
               updated_at = excluded.updated_at",
            params![
                pref.user_id,
                pref.email,
                symbols,
                pref.daily_insights_opt_in,
                pref.last_analysis_date.map(|d| d.format("%Y-%m-%d").to_string()),
                alerts,
                now.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_preference(&self, user_id: &str) -> Result<Option<UserPreference>, DbError> {
        let row = self
            .conn()
            .query_row(
                "SELECT user_id, email, selected_symbols, daily_insights_opt_in,
                        last_analysis_date, alert_preferences
                 FROM user_preferences WHERE user_id = ?1",
                params![user_id],
                PreferenceRow::from_row,
            )
            .optional()?;
        row.map(PreferenceRow::into_preference).transpose()
    }

    pub fn list_preferences(&self) -> Result<Vec<UserPreference>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, email, selected_symbols, daily_insights_opt_in,
                    last_analysis_date, alert_preferences
             FROM user_preferences ORDER BY user_id",
        )?;
        let rows = stmt.query_map([], PreferenceRow::from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_preference()?);
        }
        Ok(out)
    }

    /// Keyset pagination over opted-in users, ordered by `user_id`. Pass the
    /// previous page's `next_cursor` to continue.
    pub fn list_opted_in_users(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Page<UserPreference>, DbError> {
        let limit = limit.max(1);
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, email, selected_symbols, daily_insights_opt_in,
                    last_analysis_date, alert_preferences
             FROM user_preferences
             WHERE daily_insights_opt_in = 1 AND user_id > ?1
             ORDER BY user_id
             LIMIT ?2",
        )?;
        // Fetch one extra row to learn whether another page exists.
        let rows = stmt.query_map(
            params![after.unwrap_or(""), (limit + 1) as i64],
            PreferenceRow::from_row,
        )?;
        let mut items = Vec::with_capacity(limit + 1);
        for row in rows {
            items.push(row?.into_preference()?);
        }
        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items.last().map(|p| p.user_id.clone())
        } else {
            None
        };
        Ok(Page { items, next_cursor })
    }

    pub fn set_last_analysis_date(&self, user_id: &str, date: NaiveDate) -> Result<(), DbError> {
        let changed = self.conn().execute(
            "UPDATE user_preferences SET last_analysis_date = ?2 WHERE user_id = ?1",
            params![user_id, date.format("%Y-%m-%d").to_string()],
        )?;
        if changed == 0 {
            return Err(DbError::Missing {
                kind: "user",
                key: user_id.to_string(),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Analysis history
    // ------------------------------------------------------------------

    /// Appends a record and returns its id. `record.id` is ignored.
    pub fn append_history(&self, record: &AnalysisHistoryRecord) -> Result<i64, DbError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO analysis_history (
               user_id, timestamp, stocks_analyzed, top_gainer, top_loser,
               average_change_pct, analysis_text, recommendation, confidence,
               risk_level, source, email_sent
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.user_id,
                record.timestamp.to_rfc3339(),
                serde_json::to_string(&record.stocks_analyzed)?,
                record.top_gainer.as_ref().map(serde_json::to_string).transpose()?,
                record.top_loser.as_ref().map(serde_json::to_string).transpose()?,
                record.average_change_pct,
                record.analysis_text,
                record.recommendation.as_str(),
                record.confidence,
                record.risk_level.as_str(),
                record.source.as_str(),
                record.email_sent,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn mark_email_sent(&self, id: i64) -> Result<(), DbError> {
        let changed = self.conn().execute(
            "UPDATE analysis_history SET email_sent = 1 WHERE id = ?1",
            params![id],
        )?;
        if changed == 0 {
            return Err(DbError::Missing {
                kind: "history record",
                key: id.to_string(),
            });
        }
        Ok(())
    }

    /// Most recent first.
    pub fn history_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<AnalysisHistoryRecord>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, timestamp, stocks_analyzed, top_gainer, top_loser,
                    average_change_pct, analysis_text, recommendation, confidence,
                    risk_level, source, email_sent
             FROM analysis_history
             WHERE user_id = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64], HistoryRow::from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_record()?);
        }
        Ok(out)
    }
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, DbError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn parse_symbol(value: &str) -> Result<Symbol, DbError> {
    Symbol::parse(value).map_err(|e| DbError::Invalid(e.to_string()))
}

struct QuoteRow {
    symbol: String,
    current: f64,
    open: f64,
    high: f64,
    low: f64,
    previous_close: f64,
    fetched_at: i64,
}

impl QuoteRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            symbol: row.get(0)?,
            current: row.get(1)?,
            open: row.get(2)?,
            high: row.get(3)?,
            low: row.get(4)?,
            previous_close: row.get(5)?,
            fetched_at: row.get(6)?,
        })
    }

    fn into_quote(self) -> Result<Quote, DbError> {
        Ok(Quote::from_prices(
            parse_symbol(&self.symbol)?,
            QuotePrices {
                current: self.current,
                open: self.open,
                high: self.high,
                low: self.low,
                previous_close: self.previous_close,
            },
            self.fetched_at,
        ))
    }
}

struct PreferenceRow {
    user_id: String,
    email: String,
    selected_symbols: String,
    opt_in: bool,
    last_analysis_date: Option<String>,
    alert_preferences: Option<String>,
}

impl PreferenceRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            email: row.get(1)?,
            selected_symbols: row.get(2)?,
            opt_in: row.get(3)?,
            last_analysis_date: row.get(4)?,
            alert_preferences: row.get(5)?,
        })
    }

    fn into_preference(self) -> Result<UserPreference, DbError> {
        let alert_preferences = self
            .alert_preferences
            .as_deref()
            .map(serde_json::from_str::<AlertPreferences>)
            .transpose()?;
        let last_analysis_date = self
            .last_analysis_date
            .as_deref()
            .map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d"))
            .transpose()?;
        Ok(UserPreference {
            user_id: self.user_id,
            email: self.email,
            selected_symbols: serde_json::from_str(&self.selected_symbols)?,
            daily_insights_opt_in: self.opt_in,
            last_analysis_date,
            alert_preferences,
        })
    }
}

struct HistoryRow {
    id: i64,
    user_id: String,
    timestamp: String,
    stocks_analyzed: String,
    top_gainer: Option<String>,
    top_loser: Option<String>,
    average_change_pct: f64,
    analysis_text: String,
    recommendation: String,
    confidence: i64,
    risk_level: String,
    source: String,
    email_sent: bool,
}

impl HistoryRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            timestamp: row.get(2)?,
            stocks_analyzed: row.get(3)?,
            top_gainer: row.get(4)?,
            top_loser: row.get(5)?,
            average_change_pct: row.get(6)?,
            analysis_text: row.get(7)?,
            recommendation: row.get(8)?,
            confidence: row.get(9)?,
            risk_level: row.get(10)?,
            source: row.get(11)?,
            email_sent: row.get(12)?,
        })
    }

    fn into_record(self) -> Result<AnalysisHistoryRecord, DbError> {
        let mover = |raw: Option<String>| -> Result<Option<Mover>, DbError> {
            Ok(raw.as_deref().map(serde_json::from_str).transpose()?)
        };
        Ok(AnalysisHistoryRecord {
            id: self.id,
            user_id: self.user_id,
            timestamp: parse_ts(&self.timestamp)?,
            stocks_analyzed: serde_json::from_str(&self.stocks_analyzed)?,
            top_gainer: mover(self.top_gainer)?,
            top_loser: mover(self.top_loser)?,
            average_change_pct: self.average_change_pct,
            analysis_text: self.analysis_text,
            recommendation: self
                .recommendation
                .parse::<Action>()
                .map_err(DbError::Invalid)?,
            confidence: u8::try_from(self.confidence)
                .map_err(|_| DbError::Invalid(format!("confidence {}", self.confidence)))?,
            risk_level: self.risk_level.parse::<RiskLevel>().map_err(DbError::Invalid)?,
            source: self
                .source
                .parse::<RecommendationSource>()
                .map_err(DbError::Invalid)?,
            email_sent: self.email_sent,
        })
    }
}
