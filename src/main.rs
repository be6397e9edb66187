//! Forum Rank Daemon
//!
//! Hosts the vote engine and reconciles its state into SQLite on a schedule.
//!
//! The binary exposes no network surface of its own: posts and votes reach
//! the engine through the library API (`VoteEngine`) of whatever process
//! embeds it. Run standalone, it keeps the schema current and reconciles an
//! empty store.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (pass every 60s, data in the platform data dir)
//! forum-rank
//!
//! # Start with custom config
//! forum-rank --config /etc/forum-rank.toml
//!
//! # Override the schedule and verbosity
//! forum-rank --interval-secs 30 --log-level debug
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use forum_rank::ranking::spawn_cache_cleanup_task;
use forum_rank::{
    logging, Config, PersistDb, ReconciliationPipeline, Scheduler, SqliteStore, SystemClock,
    VoteEngine, VoteRules,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "forum-rank")]
#[command(about = "Vote and ranking engine for forum posts")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "FORUM_RANK_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the SQLite database
    #[arg(long, env = "FORUM_RANK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Seconds between reconciliation passes
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "FORUM_RANK_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load config
    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };

    // Apply CLI overrides
    if let Some(dir) = args.data_dir {
        config.storage.data_dir = dir;
    }
    if let Some(secs) = args.interval_secs {
        config.persistence.interval_secs = secs;
    }
    if let Some(level) = args.log_level {
        config.persistence.log_level = level;
    }

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(2);
    }

    logging::init(&config.persistence.log_level)?;

    info!(
        data_dir = %config.storage.data_dir.display(),
        interval_secs = config.persistence.interval_secs,
        batch_size = config.persistence.batch_size,
        retention_days = config.persistence.score_retention_days,
        "Starting forum-rank"
    );

    tokio::fs::create_dir_all(&config.storage.data_dir).await?;
    let db = Arc::new(PersistDb::open(&config.storage.data_dir)?);

    let engine = VoteEngine::new(
        Arc::new(SystemClock),
        VoteRules::default(),
        Duration::from_secs(config.ranking.community_cache_ttl_secs),
    );
    spawn_cache_cleanup_task(
        Arc::clone(engine.ranking()),
        Duration::from_secs(config.ranking.cache_cleanup_interval_secs.max(1)),
    );

    let sink = Arc::new(SqliteStore::new(Arc::clone(&db), config.persistence.batch_size));
    let pipeline = Arc::new(ReconciliationPipeline::new(
        Arc::clone(engine.store()),
        sink,
        config.persistence.pipeline_settings(),
    ));
    let scheduler = Arc::new(Scheduler::new(&config.persistence, pipeline)?);
    Arc::clone(&scheduler).start().await;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    scheduler.shutdown().await;

    // Final pass so votes since the last tick are not lost
    if let Err(e) = scheduler.run_now().await {
        error!(error = %e, "Final reconciliation pass failed");
    }

    match db.stats() {
        Ok(stats) => info!(
            score_rows = stats.score_rows,
            vote_rows = stats.vote_rows,
            "forum-rank stopped"
        ),
        Err(e) => error!(error = %e, "Failed to read database stats"),
    }

    Ok(())
}
