//! The `refresh` subcommand: fetch the universe into SQLite under the rate budget.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use stockpulse_lib::refresh::RefreshReport;
use stockpulse_lib::symbols::{default_universe, load_universe_file};
use stockpulse_lib::{BatchFetcher, FailurePolicy, MarketDataRefreshJob, SymbolOutcome};

use super::Context;
use crate::output::print_summary;

#[derive(Args)]
pub struct RefreshArgs {
    /// Universe file, one ticker per line (default: embedded S&P 500 list)
    #[arg(long)]
    pub universe: Option<PathBuf>,

    /// What to record for a failed symbol: skip or placeholder
    #[arg(long, default_value = "skip")]
    pub policy: String,

    /// Only refresh the first N symbols of the universe
    #[arg(long)]
    pub limit: Option<usize>,
}

pub async fn run(args: &RefreshArgs, ctx: &Context) -> Result<()> {
    let report = refresh_once(ctx, args.universe.as_ref(), &args.policy, args.limit, true).await?;
    print_summary(&report.summary, &ctx.format)?;
    Ok(())
}

/// Shared with `schedule`. The progress bar is only drawn for interactive runs.
pub async fn refresh_once(
    ctx: &Context,
    universe: Option<&PathBuf>,
    policy: &str,
    limit: Option<usize>,
    show_progress: bool,
) -> Result<RefreshReport> {
    let policy: FailurePolicy = policy.parse().map_err(anyhow::Error::msg)?;
    let mut symbols = match universe {
        Some(path) => load_universe_file(path)?,
        None => default_universe(),
    };
    if let Some(n) = limit {
        symbols.truncate(n);
    }
    if symbols.is_empty() {
        bail!("universe is empty; nothing to refresh");
    }

    let db = ctx.open_db()?;
    // Placeholders fall back to the last stored quote.
    ctx.quote_cache.warm_from(db.list_quotes()?);
    let limiter = ctx.rate_limiter();
    let fetcher = BatchFetcher::new(Arc::new(ctx.quote_source()?), Arc::clone(&limiter))
        .with_policy(policy)
        .with_cache(Arc::clone(&ctx.quote_cache))
        .with_jitter(ctx.settings.fetch_jitter);
    let job = MarketDataRefreshJob::new(Arc::clone(&db), fetcher, ctx.clock.clone());

    let estimate = ctx.settings.fetch_interval * symbols.len() as u32;
    eprintln!(
        "Refreshing {} symbols into {} (about {}s at the current rate budget)",
        symbols.len(),
        ctx.db_path.display(),
        estimate.as_secs()
    );

    let pb = if show_progress {
        ProgressBar::new(symbols.len() as u64)
    } else {
        ProgressBar::hidden()
    };
    pb.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} ({eta}) {msg}",
        )?
        .progress_chars("=>-"),
    );
    pb.set_message("fetching quotes...");

    let mut ok = 0usize;
    let mut failed = 0usize;
    let report = job
        .run_with_progress(&symbols, |_, symbol, outcome| {
            match outcome {
                SymbolOutcome::Fetched(_) => ok += 1,
                SymbolOutcome::Failed(e) | SymbolOutcome::Placeholder { error: e, .. } => {
                    failed += 1;
                    if !e.is_transient() {
                        pb.println(format!("  {}: {}", symbol, e));
                    }
                }
            }
            match limiter.remaining_budget() {
                Some(left) => pb.set_message(format!("{} ok, {} err, {} calls left this minute", ok, failed, left)),
                None => pb.set_message(format!("{} ok, {} err", ok, failed)),
            }
            pb.inc(1);
        })
        .await?;

    pb.finish_with_message(format!(
        "Done: {} fetched ({} new, {} updated), {} failed",
        report.fetched,
        report.created,
        report.updated,
        report.failed.len()
    ));
    if let Some(req) = &report.requests {
        eprintln!(
            "Requests: {} made, {} succeeded, {} rate-limited, {} failed",
            req.requests_made, req.requests_succeeded, req.requests_rate_limited, req.requests_failed
        );
    }
    Ok(report)
}
