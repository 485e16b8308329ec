//! The `quotes` and `summary` subcommands: read the stored market data.

use anyhow::Result;
use chrono::{DateTime, Utc};
use stockpulse_lib::cache::BULK_FRESHNESS;
use stockpulse_lib::refresh::is_stale;
use stockpulse_lib::Db;

use super::Context;
use crate::output::{print_quotes, print_summary};

pub fn run_quotes(ctx: &Context) -> Result<()> {
    let db = ctx.open_db()?;
    let quotes = db.list_quotes()?;
    eprintln!("{} quotes from database", quotes.len());
    if !quotes.is_empty() {
        if let Some(note) = staleness_note(&db, ctx.clock.now())? {
            eprintln!("{}", note);
        }
    }
    print_quotes(&quotes, &ctx.format)
}

pub fn run_summary(ctx: &Context) -> Result<()> {
    let db = ctx.open_db()?;
    match db.get_summary()? {
        Some(summary) => {
            if let Some(note) = staleness_note(&db, ctx.clock.now())? {
                eprintln!("{}", note);
            }
            print_summary(&summary, &ctx.format)
        }
        None => {
            eprintln!("No market summary yet. Run 'stockpulse refresh' first.");
            Ok(())
        }
    }
}

/// Warning line when the last refresh is older than [`BULK_FRESHNESS`].
fn staleness_note(db: &Db, now: DateTime<Utc>) -> Result<Option<String>> {
    if !is_stale(db, BULK_FRESHNESS, now)? {
        return Ok(None);
    }
    let note = match db.get_summary()? {
        Some(summary) => format!(
            "Warning: market data is stale (last refresh {}, {} min ago)",
            summary.last_updated_at.format("%Y-%m-%d %H:%M UTC"),
            now.signed_duration_since(summary.last_updated_at).num_minutes()
        ),
        None => "Warning: no refresh has completed yet".to_string(),
    };
    Ok(Some(note))
}
