//! The `dlq` subcommand: inspect, purge, and redrive dead letters.

use anyhow::Result;
use clap::{Args, Subcommand};

use super::Context;
use crate::output::print_dead_letters;

#[derive(Args)]
pub struct DlqArgs {
    #[command(subcommand)]
    pub command: DlqCommand,
}

#[derive(Subcommand)]
pub enum DlqCommand {
    /// List dead letters and queue depth
    List,
    /// Delete dead letters past the retention period
    Purge,
    /// Move a dead letter back onto the main queue
    Redrive {
        /// Message ID from `dlq list`
        id: String,
    },
}

pub fn run(args: &DlqArgs, ctx: &Context) -> Result<()> {
    let queue = ctx.open_queue()?;
    match &args.command {
        DlqCommand::List => {
            let stats = queue.stats()?;
            eprintln!(
                "Queue: {} visible, {} in flight, {} dead-lettered",
                stats.visible, stats.in_flight, stats.dead_letters
            );
            print_dead_letters(&queue.dead_letters()?, &ctx.format)?;
        }
        DlqCommand::Purge => {
            let removed = queue.purge_expired_dead_letters()?;
            eprintln!(
                "Purged {} dead letters older than {} days",
                removed,
                queue.config().dead_letter_retention.as_secs() / 86_400
            );
        }
        DlqCommand::Redrive { id } => {
            queue.redrive_dead_letter(id)?;
            eprintln!("Message {} is back on the queue", id);
        }
    }
    Ok(())
}
