//! The `profile` subcommand: company reference data.

use anyhow::Result;
use clap::Args;
use stockpulse_lib::Symbol;

use super::Context;
use crate::output::print_profile;

#[derive(Args)]
pub struct ProfileArgs {
    pub symbol: String,
}

pub async fn run(args: &ProfileArgs, ctx: &Context) -> Result<()> {
    let symbol = Symbol::parse(&args.symbol)?;
    let source = ctx.quote_source()?;
    let profile = source.client().get_company_profile(symbol.as_str()).await?;
    print_profile(&profile, &ctx.format)
}
