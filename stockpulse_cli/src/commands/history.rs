//! The `history` subcommand.

use anyhow::Result;
use clap::Args;

use super::Context;
use crate::output::print_history;

#[derive(Args)]
pub struct HistoryArgs {
    #[arg(long)]
    pub user: String,

    /// Most recent N analyses
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

pub fn run(args: &HistoryArgs, ctx: &Context) -> Result<()> {
    let records = ctx.open_db()?.history_for_user(&args.user, args.limit)?;
    eprintln!("{} analyses for {}", records.len(), args.user);
    print_history(&records, &ctx.format)
}
