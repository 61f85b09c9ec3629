/*
linkpress - sync binary
Pulls shared links out of configured Slack channels, classifies them for
newsletter-worthiness, and persists accepted article stubs.
*/

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use common::{init_db_pool, init_schema, Config};
use linkpress::sync::run_sync;

#[derive(Parser, Debug)]
#[command(name = "linkpress", about = "Linkpress Slack link ingestion")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    /// Override the per-channel message window from the config
    #[arg(long)]
    limit: Option<usize>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    if !args.config.exists() {
        error!(path = ?args.config, "config file not found");
        return Err(anyhow::anyhow!("Config file not found: {}", args.config.display()));
    }

    let mut config = Config::from_file(&args.config).await?;
    if let Some(limit) = args.limit {
        config.sync.get_or_insert_with(|| common::SyncConfig {
            history_limit: None,
            batch_size: None,
        }).history_limit = Some(limit);
    }
    info!(config = ?args.config, "configuration loaded");

    let pool = init_db_pool(&config.database.path).await?;
    init_schema(&pool).await?;

    let result = run_sync(&config, &pool).await?;

    println!(
        "{} links seen, {} new, {} already saved, {} filtered out",
        result.total_links_seen, result.new_articles, result.already_known, result.filtered_out
    );

    Ok(())
}
