//! The `project` subcommand: heuristic next-session moves.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Args;
use stockpulse_lib::advisor::SocialSentiment;
use stockpulse_lib::cache::BULK_FRESHNESS;
use stockpulse_lib::projection::project_all;
use stockpulse_lib::symbols::parse_symbol_list;
use stockpulse_lib::{CachedQuoteSource, QuoteSource, Symbol};

use super::Context;
use crate::output::print_projections;

#[derive(Args)]
pub struct ProjectArgs {
    /// Ticker symbols (space or comma separated)
    #[arg(required = true)]
    pub symbols: Vec<String>,

    /// Ask the chat model for each symbol's social sentiment (one call per symbol)
    #[arg(long)]
    pub sentiment: bool,
}

pub async fn run(args: &ProjectArgs, ctx: &Context) -> Result<()> {
    let symbols = parse_symbol_list(&args.symbols.join(","))?;
    if symbols.is_empty() {
        bail!("no symbols given");
    }

    let source = CachedQuoteSource::new(ctx.quote_source()?, Arc::clone(&ctx.quote_cache))
        .with_store(ctx.open_db()?, BULK_FRESHNESS);
    let mut quotes = Vec::with_capacity(symbols.len());
    for symbol in &symbols {
        match source.fetch_quote(symbol).await {
            Ok(q) => quotes.push(q),
            Err(e) => eprintln!("{}: {}", symbol, e),
        }
    }

    let sentiment = if args.sentiment {
        collect_sentiment(ctx, &symbols).await?
    } else {
        HashMap::new()
    };

    let projections = project_all(&quotes, |s| sentiment.get(s));
    print_projections(&projections, &sentiment, &ctx.format)
}

async fn collect_sentiment(ctx: &Context, symbols: &[Symbol]) -> Result<HashMap<Symbol, SocialSentiment>> {
    let Some(advisor) = ctx.chat_advisor()? else {
        eprintln!("Note: LLM_API_KEY not set; projecting without sentiment.");
        return Ok(HashMap::new());
    };
    let mut out = HashMap::new();
    for symbol in symbols {
        match advisor.sentiment(symbol).await {
            Ok(s) => {
                out.insert(symbol.clone(), s);
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Sentiment lookup failed");
            }
        }
    }
    Ok(out)
}
