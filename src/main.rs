//! dbmonitor CLI
//!
//! Loads the configuration, connects to the database and runs the
//! monitoring queries once, or repeatedly with `--interval`.

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use dbmonitor::config::{generate_default_config, Config};
use dbmonitor::output::{sink_for, OutputFormat};
use dbmonitor::{database, logging, parse_since, run_periodically, Dispatcher, PreparedQuery};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "dbmonitor")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run SQL monitoring queries and print results as key=value log lines")]
pub struct Cli {
    /// Location of the configuration file (TOML, or JSON with a .json extension)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Lower bound for time-filtered queries: "YYYY-MM-DD HH:MM:SS.mmm" or a period like 15m
    #[arg(short, long)]
    pub since: Option<String>,

    /// Repeat every N seconds until interrupted
    #[arg(short, long)]
    pub interval: Option<u64>,

    /// Output format (overrides the config file)
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Print a default config file and exit
    #[arg(long)]
    pub print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default()?,
    };

    logging::init_logging(&config.logging).context("failed to open log file")?;

    tracing::info!("dbmonitor v{}", env!("CARGO_PKG_VERSION"));

    let since = match cli.since.as_deref().or(config.monitor.default_since.as_deref()) {
        Some(s) => Some(parse_since(s, Utc::now())?),
        None => None,
    };

    let queries = PreparedQuery::prepare_all(&config.queries)?;
    if queries.is_empty() {
        tracing::warn!("No monitoring queries configured");
    }

    let db = database::open(&config.database)?;
    let dispatcher = Dispatcher::new(db, queries)
        .channel_capacity(config.monitor.channel_capacity)
        .failure_policy(config.monitor.on_query_error);
    dispatcher.check_time_filters(since)?;

    let mut sink = sink_for(
        cli.format.unwrap_or(config.output.format),
        std::io::stdout(),
        &config.space_replacement,
        &config.output.time_format,
    );

    match cli.interval.or(config.monitor.interval_secs) {
        Some(secs) => {
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            };

            let stats = run_periodically(
                &dispatcher,
                Duration::from_secs(secs.max(1)),
                since,
                sink.as_mut(),
                shutdown,
            )
            .await?;

            tracing::info!(
                "Stopped after {} cycles, {} records",
                stats.cycles,
                stats.records_emitted
            );
            if stats.failed_queries > 0 {
                anyhow::bail!("{} query executions failed", stats.failed_queries);
            }
        }
        None => {
            let summary = dispatcher.run(since, sink.as_mut()).await?;

            if !summary.is_success() {
                for failure in &summary.failures {
                    tracing::error!("{}: {}", failure.query, failure.error);
                }
                anyhow::bail!("{} of {} queries failed", summary.failures.len(), summary.queries);
            }
        }
    }

    Ok(())
}
