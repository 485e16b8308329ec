//! The `schedule` subcommand: one long-running process standing in for the
//! three scheduled triggers.
//!
//! Refresh runs every `--refresh-every-mins`. Fan-out runs at the fixed UTC
//! daily tick and is followed immediately by a queue drain. The due check runs
//! at the top of every pass, so a tick that elapsed during a long refresh (or
//! before the process started) is caught up the same day. Redeliveries are
//! picked up by a drain every visibility timeout. Failures are logged and the
//! loop keeps going; only Ctrl-C stops it.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use stockpulse_lib::market::MarketStatus;
use stockpulse_lib::orchestrator::{next_daily_run_after, DEFAULT_PAGE_SIZE};
use stockpulse_lib::DailyAnalysisOrchestrator;
use tokio::time::MissedTickBehavior;

use super::orchestrate::fan_out;
use super::refresh::refresh_once;
use super::work::work_once;
use super::Context;

#[derive(Args)]
pub struct ScheduleArgs {
    /// Minutes between market data refreshes
    #[arg(long, default_value_t = 30)]
    pub refresh_every_mins: u64,

    /// Universe file for refreshes (default: embedded S&P 500 list)
    #[arg(long)]
    pub universe: Option<PathBuf>,

    /// Failure policy for refreshes: skip or placeholder
    #[arg(long, default_value = "skip")]
    pub policy: String,

    /// Skip refreshes while the US market is closed (nights and weekends)
    #[arg(long)]
    pub market_hours_only: bool,
}

pub async fn run(args: &ScheduleArgs, ctx: &Context) -> Result<()> {
    let period = Duration::from_secs(args.refresh_every_mins.max(1) * 60);
    let mut refresh_tick = tokio::time::interval(period);
    refresh_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut retry_tick = tokio::time::interval(ctx.settings.queue.visibility_timeout);
    retry_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if daily_due(ctx) {
            daily_run(ctx).await;
        }

        let now = ctx.clock.now();
        let next_daily = next_daily_run_after(now);
        let until_daily = (next_daily - now).to_std().unwrap_or(Duration::ZERO);
        tracing::info!("Next daily analysis at {}", next_daily.format("%Y-%m-%d %H:%M UTC"));

        tokio::select! {
            _ = refresh_tick.tick() => {
                if args.market_hours_only && MarketStatus::at(ctx.clock.now()) == MarketStatus::Closed {
                    tracing::debug!("Market closed; skipping refresh");
                    continue;
                }
                if let Err(e) = refresh_once(ctx, args.universe.as_ref(), &args.policy, None, false).await {
                    tracing::error!("Scheduled refresh failed: {:#}", e);
                }
            }
            _ = retry_tick.tick() => {
                drain_redeliveries(ctx).await;
            }
            // the due check at the top of the loop picks it up
            _ = tokio::time::sleep(until_daily) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted; stopping scheduler");
                break;
            }
        }
    }
    Ok(())
}

fn daily_due(ctx: &Context) -> bool {
    let due = ctx.open_db().and_then(|db| {
        let orchestrator = DailyAnalysisOrchestrator::new(db, ctx.open_queue()?, ctx.clock.clone());
        Ok(orchestrator.is_due()?)
    });
    match due {
        Ok(due) => due,
        Err(e) => {
            tracing::error!("Could not check the daily fan-out: {:#}", e);
            false
        }
    }
}

async fn daily_run(ctx: &Context) {
    match fan_out(ctx, DEFAULT_PAGE_SIZE, false) {
        Ok(Some(report)) => tracing::info!("Daily fan-out enqueued {} tasks", report.enqueued),
        Ok(None) => tracing::info!("Daily fan-out already done today"),
        Err(e) => {
            tracing::error!("Daily fan-out failed: {:#}", e);
            return;
        }
    }
    match work_once(ctx, None, None).await {
        Ok(report) => tracing::info!(
            "Daily analysis: {} emailed, {} failed of {} received",
            report.sent,
            report.failed,
            report.received
        ),
        Err(e) => tracing::error!("Queue drain failed: {:#}", e),
    }
}

async fn drain_redeliveries(ctx: &Context) {
    let visible = match ctx.open_queue().and_then(|q| Ok(q.stats()?)) {
        Ok(stats) => stats.visible,
        Err(e) => {
            tracing::error!("Could not read queue stats: {:#}", e);
            return;
        }
    };
    if visible == 0 {
        return;
    }
    match work_once(ctx, None, None).await {
        Ok(report) => tracing::info!(
            "Retry drain: {} emailed, {} failed of {} received",
            report.sent,
            report.failed,
            report.received
        ),
        Err(e) => tracing::error!("Retry drain failed: {:#}", e),
    }
}
