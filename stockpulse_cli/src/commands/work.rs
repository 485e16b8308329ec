//! The `work` subcommand: drain the analysis queue.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use stockpulse_lib::worker::DrainReport;
use stockpulse_lib::{drain_queue, DrainOptions};

use super::Context;

#[derive(Args)]
pub struct WorkArgs {
    /// Tasks processed at once (default: STOCKPULSE_WORKER_CONCURRENCY or 50)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Stop after receiving this many messages
    #[arg(long)]
    pub max_messages: Option<usize>,
}

pub async fn run(args: &WorkArgs, ctx: &Context) -> Result<()> {
    let report = work_once(ctx, args.concurrency, args.max_messages).await?;
    eprintln!(
        "Processed {} tasks: {} emailed, {} with no quotes, {} failed",
        report.received, report.sent, report.nothing_to_analyze, report.failed
    );
    let stats = ctx.open_queue()?.stats()?;
    if stats.dead_letters > 0 {
        eprintln!(
            "{} message(s) in the dead-letter queue; see `stockpulse dlq list`",
            stats.dead_letters
        );
    }
    Ok(())
}

pub async fn work_once(
    ctx: &Context,
    concurrency: Option<usize>,
    max_messages: Option<usize>,
) -> Result<DrainReport> {
    let db = ctx.open_db()?;
    let queue = ctx.open_queue()?;
    let worker = Arc::new(ctx.worker(db)?);
    let opts = DrainOptions {
        concurrency: concurrency.unwrap_or(ctx.settings.worker_concurrency).max(1),
        max_messages,
        ..DrainOptions::default()
    };
    Ok(drain_queue(queue, worker, opts).await?)
}
