mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use stockpulse_lib::Settings;

use crate::commands::Context;
use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "stockpulse")]
#[command(about = "Market quotes and daily portfolio insights")]
struct Cli {
    /// Output format: table, json, csv, or markdown
    #[arg(long, default_value = "table", global = true)]
    output: String,

    /// SQLite database path (overrides STOCKPULSE_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the symbol universe and rewrite the market summary
    Refresh(commands::refresh::RefreshArgs),
    /// Enqueue one daily analysis task per opted-in user
    Orchestrate(commands::orchestrate::OrchestrateArgs),
    /// Process queued analysis tasks
    Work(commands::work::WorkArgs),
    /// Run refresh, orchestrate, and work on their schedules until interrupted
    Schedule(commands::schedule::ScheduleArgs),
    /// Look up live quotes through the short-lived cache
    Quote(commands::quote::QuoteArgs),
    /// Show company reference data for one symbol
    Profile(commands::profile::ProfileArgs),
    /// Show daily bars and the period trend for one symbol
    Candles(commands::candles::CandlesArgs),
    /// Project the next session's move from the latest quotes
    Project(commands::project::ProjectArgs),
    /// List stored quotes
    Quotes,
    /// Show the stored market summary
    Summary,
    /// Manage user preferences
    Prefs(commands::prefs::PrefsArgs),
    /// Inspect and manage the dead-letter queue
    Dlq(commands::dlq::DlqArgs),
    /// Show a user's analysis history
    History(commands::history::HistoryArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stockpulse=info".parse()?),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let format = match cli.output.as_str() {
        "json" => OutputFormat::Json,
        "csv" => OutputFormat::Csv,
        "md" | "markdown" => OutputFormat::Markdown,
        _ => OutputFormat::Table,
    };

    let settings = Settings::from_env()?;
    let ctx = Context::new(settings, cli.db, format);

    match &cli.command {
        Commands::Refresh(args) => commands::refresh::run(args, &ctx).await?,
        Commands::Orchestrate(args) => commands::orchestrate::run(args, &ctx)?,
        Commands::Work(args) => commands::work::run(args, &ctx).await?,
        Commands::Schedule(args) => commands::schedule::run(args, &ctx).await?,
        Commands::Quote(args) => commands::quote::run(args, &ctx).await?,
        Commands::Profile(args) => commands::profile::run(args, &ctx).await?,
        Commands::Candles(args) => commands::candles::run(args, &ctx).await?,
        Commands::Project(args) => commands::project::run(args, &ctx).await?,
        Commands::Quotes => commands::market::run_quotes(&ctx)?,
        Commands::Summary => commands::market::run_summary(&ctx)?,
        Commands::Prefs(args) => commands::prefs::run(args, &ctx)?,
        Commands::Dlq(args) => commands::dlq::run(args, &ctx)?,
        Commands::History(args) => commands::history::run(args, &ctx)?,
    }

    Ok(())
}
