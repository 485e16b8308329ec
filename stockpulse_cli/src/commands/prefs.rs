//! The `prefs` subcommand: maintain user preferences.

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use stockpulse_lib::models::{AlertPreferences, UserPreference};
use stockpulse_lib::symbols::parse_symbol_list;

use super::Context;
use crate::output::print_preferences;

#[derive(Args)]
pub struct PrefsArgs {
    #[command(subcommand)]
    pub command: PrefsCommand,
}

#[derive(Subcommand)]
pub enum PrefsCommand {
    /// Create or replace a user's preferences
    Set(SetArgs),
    /// List all stored preferences
    List,
}

#[derive(Args)]
pub struct SetArgs {
    #[arg(long)]
    pub user: String,

    #[arg(long)]
    pub email: String,

    /// Comma-separated ticker symbols
    #[arg(long, default_value = "")]
    pub symbols: String,

    /// Receive the daily insight email
    #[arg(long, conflicts_with = "opt_out")]
    pub opt_in: bool,

    /// Stop receiving the daily insight email
    #[arg(long)]
    pub opt_out: bool,

    /// Only list symbols that moved at least this many percent
    #[arg(long)]
    pub min_move_pct: Option<f64>,

    /// Leave the per-symbol signal column out of the email
    #[arg(long)]
    pub no_signals: bool,
}

pub fn run(args: &PrefsArgs, ctx: &Context) -> Result<()> {
    let db = ctx.open_db()?;
    match &args.command {
        PrefsCommand::Set(set) => {
            if set.user.trim().is_empty() {
                bail!("--user must not be empty");
            }
            if !set.email.contains('@') {
                bail!("--email does not look like an address: {}", set.email);
            }
            if let Some(pct) = set.min_move_pct {
                if !pct.is_finite() || pct < 0.0 {
                    bail!("--min-move-pct must be a non-negative number");
                }
            }

            // Without a flag the existing opt-in is kept.
            let existing = db.get_preference(&set.user)?;
            let opt_in = if set.opt_in {
                true
            } else if set.opt_out {
                false
            } else {
                existing.as_ref().map_or(false, |p| p.daily_insights_opt_in)
            };
            let alert_preferences = if set.min_move_pct.is_some() || set.no_signals {
                Some(AlertPreferences {
                    price_move_threshold_pct: set.min_move_pct,
                    include_rule_signals: !set.no_signals,
                })
            } else {
                existing.as_ref().and_then(|p| p.alert_preferences.clone())
            };

            let pref = UserPreference {
                user_id: set.user.trim().to_string(),
                email: set.email.trim().to_string(),
                selected_symbols: parse_symbol_list(&set.symbols)?.into_iter().collect(),
                daily_insights_opt_in: opt_in,
                last_analysis_date: None,
                alert_preferences,
            };
            db.save_preference(&pref, ctx.clock.now())?;
            eprintln!(
                "Saved {} ({} symbols, daily insights {})",
                pref.user_id,
                pref.selected_symbols.len(),
                if pref.daily_insights_opt_in { "on" } else { "off" }
            );
            if pref.daily_insights_opt_in && pref.selected_symbols.is_empty() {
                eprintln!("Note: no symbols selected, so no daily email will be sent.");
            }
        }
        PrefsCommand::List => {
            let prefs = db.list_preferences()?;
            print_preferences(&prefs, &ctx.format)?;
        }
    }
    Ok(())
}
