//! The `candles` subcommand: daily bars over a trailing window.

use anyhow::{bail, Result};
use chrono::Duration;
use clap::Args;
use stockpulse_lib::trend::Trend;
use stockpulse_lib::Symbol;

use super::Context;
use crate::output::{format_trend, print_candles};

#[derive(Args)]
pub struct CandlesArgs {
    pub symbol: String,

    /// Calendar days to look back
    #[arg(long, default_value_t = 30)]
    pub days: u32,
}

pub async fn run(args: &CandlesArgs, ctx: &Context) -> Result<()> {
    if args.days == 0 {
        bail!("--days must be at least 1");
    }
    let symbol = Symbol::parse(&args.symbol)?;
    let to = ctx.clock.now();
    let from = to - Duration::days(i64::from(args.days));

    let source = ctx.quote_source()?;
    let candles = source
        .client()
        .get_daily_candles(symbol.as_str(), from.timestamp(), to.timestamp())
        .await?;
    print_candles(&candles, &ctx.format)?;

    if let Some(trend) = Trend::of(&candles) {
        eprintln!("{}: {}", symbol, format_trend(&trend));
    }
    Ok(())
}
