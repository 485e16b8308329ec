//! The `quote` subcommand: live lookups through the interactive cache.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;
use stockpulse_lib::cache::BULK_FRESHNESS;
use stockpulse_lib::symbols::parse_symbol_list;
use stockpulse_lib::{CachedQuoteSource, QuoteSource};

use super::Context;
use crate::output::print_quotes;

#[derive(Args)]
pub struct QuoteArgs {
    /// Ticker symbols (space or comma separated)
    #[arg(required = true)]
    pub symbols: Vec<String>,

    /// Re-print every N seconds until interrupted. Repeats inside the cache
    /// TTL are served without calling the API.
    #[arg(long)]
    pub watch: Option<u64>,

    /// Always call the API instead of serving a quote from the last refresh
    #[arg(long)]
    pub live: bool,
}

pub async fn run(args: &QuoteArgs, ctx: &Context) -> Result<()> {
    let symbols = parse_symbol_list(&args.symbols.join(","))?;
    if symbols.is_empty() {
        bail!("no symbols given");
    }

    let mut source = CachedQuoteSource::new(ctx.quote_source()?, Arc::clone(&ctx.quote_cache));
    if !args.live {
        source = source.with_store(ctx.open_db()?, BULK_FRESHNESS);
    }

    loop {
        let mut quotes = Vec::with_capacity(symbols.len());
        for symbol in &symbols {
            match source.fetch_quote(symbol).await {
                Ok(q) => quotes.push(q),
                Err(e) => eprintln!("{}: {}", symbol, e),
            }
        }
        print_quotes(&quotes, &ctx.format)?;

        let Some(secs) = args.watch else {
            break;
        };
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(secs.max(1))) => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}
