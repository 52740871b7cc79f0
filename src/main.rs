//! Statline main entry point
//!
//! This is the command-line interface for the Statline sync daemon.

use anyhow::Context;
use clap::Parser;
use statline::config::{load_config, Config};
use statline::crawler::{AuditLogCrawler, ConsumerSummary, Crawler, EngineSettings, HistoryCrawler};
use statline::ingest::LiveIngestor;
use statline::source::{ArchiveSource, EventSource};
use statline::storage::{open_store, table_counts};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Statline: keeps a local database in sync with a chat platform
///
/// Statline backfills channel, thread and audit-log history into SQLite
/// while applying live events, and resumes where it left off after a
/// restart.
#[derive(Parser, Debug)]
#[command(name = "statline")]
#[command(version = "1.0.0")]
#[command(about = "Chat platform to SQLite sync", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config(&cli.config) {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.dry_run {
        handle_dry_run(&config).await?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(config).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("statline=info,warn"),
            1 => EnvFilter::new("statline=debug,info"),
            2 => EnvFilter::new("statline=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_archive(config: &Config) -> anyhow::Result<ArchiveSource> {
    ArchiveSource::open(Path::new(&config.source.archive_path))
        .with_context(|| format!("failed to open archive {}", config.source.archive_path))
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
async fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Statline Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Queue size: {}", config.crawler.queue_size);
    println!("  Batch size: {}", config.crawler.batch_size);
    println!("  Yield delay: {}s", config.crawler.delays.yield_delay);
    println!("  Empty-source delay: {}s", config.crawler.delays.empty_source);
    match config.cache.size {
        Some(size) => println!("  Write cache: {} rows", size),
        None => println!("  Write cache: unbounded"),
    }

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);

    let source = open_archive(config)?;
    let guilds = source.guilds().await?;

    println!("\nSource: {}", config.source.archive_path);
    for guild in guilds.iter().filter(|guild| config.source.wants_guild(guild.id)) {
        let channels = source.channels(guild.id).await?;
        let threads = source.threads(guild.id).await?;
        println!(
            "  - {} ({}): {} channels, {} threads, audit log {}",
            guild.name,
            guild.id,
            channels.len(),
            threads.len(),
            if guild.can_view_audit_log {
                "readable"
            } else {
                "hidden"
            }
        );
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let store = open_store(Path::new(&config.storage.database_path), config.cache.size)?;
    for (table, rows) in table_counts(&store)? {
        println!("  {:<16} {:>10}", table, rows);
    }

    Ok(())
}

fn report(name: &str, summary: &ConsumerSummary) {
    tracing::info!(
        "Progress: {} committed {} pages across {} sources",
        name,
        summary.pages,
        summary.committed.len()
    );
}

/// Handles the main sync operation
async fn handle_crawl(config: Config) -> anyhow::Result<()> {
    let store = Arc::new(open_store(
        Path::new(&config.storage.database_path),
        config.cache.size,
    )?);
    let source = Arc::new(open_archive(&config)?);
    let settings = EngineSettings::from(&config.crawler);
    let guild_ids = config.source.guild_ids.clone();

    // Snapshot of the wanted guilds and their channels before any crawler starts
    let mut guilds = source.guilds().await?;
    guilds.retain(|guild| config.source.wants_guild(guild.id));
    let mut channels = Vec::new();
    for guild in &guilds {
        channels.extend(source.channels(guild.id).await?);
        channels.extend(source.threads(guild.id).await?);
    }
    let ingestor = LiveIngestor::new(Arc::clone(&store));
    let written = ingestor.sync_snapshot(&guilds, &channels)?;
    tracing::info!(
        "Synced {} guilds and {} channels ({} rows written)",
        guilds.len(),
        channels.len(),
        written
    );

    let channel_crawler = Crawler::new(
        HistoryCrawler::channels(Arc::clone(&source), guild_ids.clone()),
        Arc::clone(&store),
        settings.clone(),
    )
    .start()
    .await?;
    let thread_crawler = Crawler::new(
        HistoryCrawler::threads(Arc::clone(&source), guild_ids.clone()),
        Arc::clone(&store),
        settings.clone(),
    )
    .start()
    .await?;
    let audit_crawler = Crawler::new(
        AuditLogCrawler::new(Arc::clone(&source), guild_ids),
        Arc::clone(&store),
        settings,
    )
    .start()
    .await?;

    let ingestor = ingestor
        .with_channel_crawler(channel_crawler.handle())
        .with_thread_crawler(thread_crawler.handle());
    let events = source.live_events();
    let live = tokio::spawn(async move { ingestor.run(events).await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, waiting for queued pages to commit");

    let (_, channels) = channel_crawler.stop().await?;
    let (_, threads) = thread_crawler.stop().await?;
    let (_, audit) = audit_crawler.stop().await?;
    let live = live.await?;

    report("channels", &channels);
    report("threads", &threads);
    report("audit-log", &audit);
    tracing::info!("Progress: {} live events applied", live.events);

    let stats = store.stats()?;
    tracing::info!(
        "Store: {} commits, {} rollbacks, {} written, {} suppressed, {} cached ({} evicted)",
        stats.commits,
        stats.rollbacks,
        stats.written,
        stats.suppressed,
        stats.cached,
        stats.evictions
    );

    Ok(())
}
