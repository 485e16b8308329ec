use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use stockpulse_lib::advisor::SocialSentiment;
use stockpulse_lib::market::MarketSummaryRecord;
use stockpulse_lib::models::{AnalysisHistoryRecord, UserPreference};
use stockpulse_lib::queue::DeadLetter;
use stockpulse_lib::finnhub_api::types::{Candle, CompanyProfile};
use stockpulse_lib::projection::Projection;
use stockpulse_lib::trend::Trend;
use stockpulse_lib::{Quote, Symbol};
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Clone, Debug)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
    Markdown,
}

#[derive(Tabled, Serialize)]
struct QuoteRow {
    #[tabled(rename = "Symbol")]
    #[serde(rename = "Symbol")]
    symbol: String,
    #[tabled(rename = "Price")]
    #[serde(rename = "Price")]
    price: String,
    #[tabled(rename = "Change")]
    #[serde(rename = "Change")]
    change: String,
    #[tabled(rename = "Change %")]
    #[serde(rename = "Change %")]
    change_pct: String,
    #[tabled(rename = "Open")]
    #[serde(rename = "Open")]
    open: String,
    #[tabled(rename = "High")]
    #[serde(rename = "High")]
    high: String,
    #[tabled(rename = "Low")]
    #[serde(rename = "Low")]
    low: String,
    #[tabled(rename = "Prev Close")]
    #[serde(rename = "Prev Close")]
    previous_close: String,
    #[tabled(rename = "Fetched")]
    #[serde(rename = "Fetched")]
    fetched: String,
}

#[derive(Tabled, Serialize)]
struct SummaryRow {
    #[tabled(rename = "Status")]
    #[serde(rename = "Status")]
    status: String,
    #[tabled(rename = "Symbols")]
    #[serde(rename = "Symbols")]
    total: usize,
    #[tabled(rename = "Gainers")]
    #[serde(rename = "Gainers")]
    gainers: usize,
    #[tabled(rename = "Losers")]
    #[serde(rename = "Losers")]
    losers: usize,
    #[tabled(rename = "Unchanged")]
    #[serde(rename = "Unchanged")]
    unchanged: usize,
    #[tabled(rename = "Breadth")]
    #[serde(rename = "Breadth")]
    breadth: String,
    #[tabled(rename = "Updated")]
    #[serde(rename = "Updated")]
    updated: String,
}

#[derive(Tabled, Serialize)]
struct PreferenceRow {
    #[tabled(rename = "User")]
    #[serde(rename = "User")]
    user: String,
    #[tabled(rename = "Email")]
    #[serde(rename = "Email")]
    email: String,
    #[tabled(rename = "Symbols")]
    #[serde(rename = "Symbols")]
    symbols: String,
    #[tabled(rename = "Daily Insights")]
    #[serde(rename = "Daily Insights")]
    opt_in: String,
    #[tabled(rename = "Last Analysis")]
    #[serde(rename = "Last Analysis")]
    last_analysis: String,
}

#[derive(Tabled, Serialize)]
struct HistoryRow {
    #[tabled(rename = "Date")]
    #[serde(rename = "Date")]
    date: String,
    #[tabled(rename = "Symbols")]
    #[serde(rename = "Symbols")]
    symbols: String,
    #[tabled(rename = "Avg Change")]
    #[serde(rename = "Avg Change")]
    average_change: String,
    #[tabled(rename = "Recommendation")]
    #[serde(rename = "Recommendation")]
    recommendation: String,
    #[tabled(rename = "Confidence")]
    #[serde(rename = "Confidence")]
    confidence: u8,
    #[tabled(rename = "Risk")]
    #[serde(rename = "Risk")]
    risk: String,
    #[tabled(rename = "Source")]
    #[serde(rename = "Source")]
    source: String,
    #[tabled(rename = "Emailed")]
    #[serde(rename = "Emailed")]
    emailed: String,
}

#[derive(Tabled, Serialize)]
struct DeadLetterRow {
    #[tabled(rename = "Message ID")]
    #[serde(rename = "Message ID")]
    message_id: String,
    #[tabled(rename = "User")]
    #[serde(rename = "User")]
    user: String,
    #[tabled(rename = "Receives")]
    #[serde(rename = "Receives")]
    receives: u32,
    #[tabled(rename = "Sent")]
    #[serde(rename = "Sent")]
    sent: String,
    #[tabled(rename = "Dead-lettered")]
    #[serde(rename = "Dead-lettered")]
    dead_lettered: String,
}

#[derive(Tabled, Serialize)]
struct ProfileRow {
    #[tabled(rename = "Ticker")]
    #[serde(rename = "Ticker")]
    ticker: String,
    #[tabled(rename = "Name")]
    #[serde(rename = "Name")]
    name: String,
    #[tabled(rename = "Industry")]
    #[serde(rename = "Industry")]
    industry: String,
    #[tabled(rename = "Exchange")]
    #[serde(rename = "Exchange")]
    exchange: String,
    #[tabled(rename = "Market Cap")]
    #[serde(rename = "Market Cap")]
    market_cap: String,
    #[tabled(rename = "IPO")]
    #[serde(rename = "IPO")]
    ipo: String,
}

#[derive(Tabled, Serialize)]
struct CandleRow {
    #[tabled(rename = "Date")]
    #[serde(rename = "Date")]
    date: String,
    #[tabled(rename = "Open")]
    #[serde(rename = "Open")]
    open: String,
    #[tabled(rename = "High")]
    #[serde(rename = "High")]
    high: String,
    #[tabled(rename = "Low")]
    #[serde(rename = "Low")]
    low: String,
    #[tabled(rename = "Close")]
    #[serde(rename = "Close")]
    close: String,
    #[tabled(rename = "Volume")]
    #[serde(rename = "Volume")]
    volume: String,
}

#[derive(Tabled, Serialize)]
struct ProjectionRow {
    #[tabled(rename = "Symbol")]
    #[serde(rename = "Symbol")]
    symbol: String,
    #[tabled(rename = "Price")]
    #[serde(rename = "Price")]
    price: String,
    #[tabled(rename = "Projected")]
    #[serde(rename = "Projected")]
    projected: String,
    #[tabled(rename = "Change %")]
    #[serde(rename = "Change %")]
    change_pct: String,
    #[tabled(rename = "Confidence")]
    #[serde(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Sentiment")]
    #[serde(rename = "Sentiment")]
    sentiment: String,
}

// -- Row builders --

fn build_quote_rows(quotes: &[Quote]) -> Vec<QuoteRow> {
    quotes
        .iter()
        .map(|q| QuoteRow {
            symbol: q.symbol.to_string(),
            price: format_price(q.current_price),
            change: format!("{:+.2}", q.change_abs),
            change_pct: format_pct(q.change_pct),
            open: format_price(q.open_price),
            high: format_price(q.high_price),
            low: format_price(q.low_price),
            previous_close: format_price(q.previous_close),
            fetched: Utc
                .timestamp_opt(q.fetched_at_epoch_seconds, 0)
                .single()
                .map(format_time)
                .unwrap_or_default(),
        })
        .collect()
}

fn build_summary_rows(summary: &MarketSummaryRecord) -> Vec<SummaryRow> {
    vec![SummaryRow {
        status: summary.market_status.to_string(),
        total: summary.total_symbols,
        gainers: summary.gainers,
        losers: summary.losers,
        unchanged: summary.unchanged,
        breadth: summary
            .advance_ratio()
            .map(|r| format!("{:.1}%", r * 100.0))
            .unwrap_or_else(|| "-".to_string()),
        updated: format_time(summary.last_updated_at),
    }]
}

fn build_preference_rows(prefs: &[UserPreference]) -> Vec<PreferenceRow> {
    prefs
        .iter()
        .map(|p| PreferenceRow {
            user: p.user_id.clone(),
            email: p.email.clone(),
            symbols: join_symbols(p.selected_symbols.iter()),
            opt_in: if p.daily_insights_opt_in { "yes" } else { "no" }.to_string(),
            last_analysis: p
                .last_analysis_date
                .map(|d| d.to_string())
                .unwrap_or_default(),
        })
        .collect()
}

fn build_history_rows(records: &[AnalysisHistoryRecord]) -> Vec<HistoryRow> {
    records
        .iter()
        .map(|r| HistoryRow {
            date: format_time(r.timestamp),
            symbols: join_symbols(r.stocks_analyzed.iter()),
            average_change: format_pct(r.average_change_pct),
            recommendation: r.recommendation.to_string(),
            confidence: r.confidence,
            risk: r.risk_level.to_string(),
            source: r.source.to_string(),
            emailed: if r.email_sent { "yes" } else { "no" }.to_string(),
        })
        .collect()
}

fn build_dead_letter_rows(letters: &[DeadLetter]) -> Vec<DeadLetterRow> {
    letters
        .iter()
        .map(|d| DeadLetterRow {
            message_id: d.message_id.clone(),
            user: d
                .task()
                .map(|t| t.user_id)
                .unwrap_or_else(|| "(undecodable)".to_string()),
            receives: d.receive_count,
            sent: format_time(d.sent_at),
            dead_lettered: format_time(d.dead_lettered_at),
        })
        .collect()
}

fn build_profile_rows(profile: &CompanyProfile) -> Vec<ProfileRow> {
    vec![ProfileRow {
        ticker: profile.ticker.clone().unwrap_or_default(),
        name: profile.name.clone().unwrap_or_default(),
        industry: profile.finnhub_industry.clone().unwrap_or_default(),
        exchange: profile.exchange.clone().unwrap_or_default(),
        // reported in millions
        market_cap: profile
            .market_capitalization
            .map(|m| format_market_cap(m * 1_000_000.0))
            .unwrap_or_default(),
        ipo: profile.ipo.clone().unwrap_or_default(),
    }]
}

fn build_candle_rows(candles: &[Candle]) -> Vec<CandleRow> {
    candles
        .iter()
        .map(|c| CandleRow {
            date: Utc
                .timestamp_opt(c.timestamp, 0)
                .single()
                .map(|t| t.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            open: format_price(c.open),
            high: format_price(c.high),
            low: format_price(c.low),
            close: format_price(c.close),
            volume: format!("{:.0}", c.volume),
        })
        .collect()
}

fn build_projection_rows(
    projections: &[Projection],
    sentiment: &HashMap<Symbol, SocialSentiment>,
) -> Vec<ProjectionRow> {
    projections
        .iter()
        .map(|p| ProjectionRow {
            symbol: p.symbol.to_string(),
            price: format_price(p.current_price),
            projected: format_price(p.projected_price),
            change_pct: format_pct(p.projected_change_pct),
            confidence: format!("{:.0}%", p.confidence),
            sentiment: sentiment
                .get(&p.symbol)
                .map(|s| format!("{} ({:+.2})", s.label(), s.sentiment_score))
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect()
}

// -- Generic printers --

fn print_table<T: Tabled>(rows: Vec<T>) {
    println!("{}", Table::new(rows));
}

fn print_markdown<T: Tabled>(rows: Vec<T>) {
    let mut table = Table::new(rows);
    table.with(Style::markdown());
    println!("{}", table);
}

fn print_csv<T: Serialize>(rows: &[T]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(std::io::stdout());
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

fn print_rows<T: Tabled + Serialize>(rows: Vec<T>, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => print_table(rows),
        OutputFormat::Markdown => print_markdown(rows),
        OutputFormat::Csv => print_csv(&rows)?,
        OutputFormat::Json => print_json(&rows),
    }
    Ok(())
}

// -- Per-entity output. JSON prints the domain records as stored. --

pub fn print_quotes(quotes: &[Quote], format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            print_json(&quotes);
            Ok(())
        }
        _ => print_rows(build_quote_rows(quotes), format),
    }
}

pub fn print_summary(summary: &MarketSummaryRecord, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            print_json(summary);
            Ok(())
        }
        _ => print_rows(build_summary_rows(summary), format),
    }
}

pub fn print_preferences(prefs: &[UserPreference], format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            print_json(&prefs);
            Ok(())
        }
        _ => print_rows(build_preference_rows(prefs), format),
    }
}

pub fn print_history(records: &[AnalysisHistoryRecord], format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            print_json(&records);
            Ok(())
        }
        _ => print_rows(build_history_rows(records), format),
    }
}

pub fn print_profile(profile: &CompanyProfile, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            print_json(profile);
            Ok(())
        }
        _ => print_rows(build_profile_rows(profile), format),
    }
}

pub fn print_dead_letters(letters: &[DeadLetter], format: &OutputFormat) -> Result<()> {
    print_rows(build_dead_letter_rows(letters), format)
}

pub fn print_candles(candles: &[Candle], format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            print_json(&candles);
            Ok(())
        }
        _ => print_rows(build_candle_rows(candles), format),
    }
}

pub fn print_projections(
    projections: &[Projection],
    sentiment: &HashMap<Symbol, SocialSentiment>,
    format: &OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            print_json(&projections);
            Ok(())
        }
        _ => print_rows(build_projection_rows(projections, sentiment), format),
    }
}

pub fn format_trend(trend: &Trend) -> String {
    format!(
        "{} over {} sessions ({} up), range {} to {}, avg volume {:.0}",
        format_pct(trend.change_pct),
        trend.sessions,
        trend.up_sessions,
        format_price(trend.period_low),
        format_price(trend.period_high),
        trend.average_volume,
    )
}

// -- JSON output --

pub fn print_json<T: serde::Serialize>(data: &T) {
    match serde_json::to_string_pretty(data) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize to JSON: {}", e),
    }
}

fn format_price(value: f64) -> String {
    format!("${:.2}", value)
}

fn format_market_cap(value: f64) -> String {
    if value >= 1e12 {
        format!("${:.2}T", value / 1e12)
    } else if value >= 1e9 {
        format!("${:.1}B", value / 1e9)
    } else if value >= 1e6 {
        format!("${:.1}M", value / 1e6)
    } else {
        format!("${:.0}", value)
    }
}

fn format_pct(value: f64) -> String {
    format!("{:+.2}%", value)
}

fn format_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn join_symbols<'a, I>(symbols: I) -> String
where
    I: Iterator<Item = &'a Symbol>,
{
    symbols.map(|s| s.as_str()).collect::<Vec<_>>().join(",")
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;
