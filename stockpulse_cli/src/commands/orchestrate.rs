//! The `orchestrate` subcommand: daily fan-out of analysis tasks.

use anyhow::Result;
use clap::Args;
use stockpulse_lib::orchestrator::{FanOutReport, DEFAULT_PAGE_SIZE};
use stockpulse_lib::DailyAnalysisOrchestrator;

use super::Context;

#[derive(Args)]
pub struct OrchestrateArgs {
    /// Users read per page (1-1000)
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: usize,

    /// Run even if today's fan-out already completed
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: &OrchestrateArgs, ctx: &Context) -> Result<()> {
    match fan_out(ctx, args.page_size, args.force)? {
        Some(report) => {
            eprintln!(
                "Enqueued {} of {} eligible users ({} scanned)",
                report.enqueued, report.eligible, report.users_scanned
            );
            for (user, reason) in &report.failed {
                eprintln!("  not enqueued: {}: {}", user, reason);
            }
        }
        None => eprintln!("Fan-out already ran today; use --force to run again."),
    }
    Ok(())
}

/// Returns `None` when skipped because today's run already happened.
pub fn fan_out(ctx: &Context, page_size: usize, force: bool) -> Result<Option<FanOutReport>> {
    let page_size = page_size.clamp(1, 1000);
    let orchestrator = DailyAnalysisOrchestrator::new(ctx.open_db()?, ctx.open_queue()?, ctx.clock.clone())
        .with_page_size(page_size);
    if !force && orchestrator.ran_today()? {
        return Ok(None);
    }
    Ok(Some(orchestrator.run()?))
}
