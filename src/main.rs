//! pgmon-agent - Entity-scoped PostgreSQL metrics snapshots.
//!
//! Usage:
//!   pgmon-agent [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Path to configuration file
//!   --pretty               Pretty-print the published snapshot
//!   --test-connection      Test the primary database connection
//!   -v, --verbose          Enable verbose logging
//!   -V, --version          Print version information
//!   -h, --help             Print help

use anyhow::{Context, Result};
use clap::Parser;
use pgmon_agent::{
    collector::{postgres::PostgresCollector, Collector},
    config::Config,
    connection::ConnectionInfo,
    publish::Snapshot,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// pgmon-agent - Entity-scoped PostgreSQL metrics snapshots
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Pretty-print the published snapshot
    #[arg(long)]
    pretty: bool,

    /// Test the primary database connection, then exit
    #[arg(long)]
    test_connection: bool,

    /// Enable verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = load_config(&args)?;

    // Setup logging
    setup_logging(&args, &config);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting pgmon agent");

    let info = ConnectionInfo::from_config(&config.connection);
    let collector = PostgresCollector::new(
        info.clone(),
        config.collection.collection_list.clone(),
        config.collection.pgbouncer,
        config.collection.collect_db_lock_metrics,
    );

    // Handle test connection mode
    if args.test_connection {
        return test_connection(&collector, &info).await;
    }

    // One run is one snapshot: collect, then publish to stdout
    let store = collector
        .collect()
        .await
        .context("Metrics collection failed")?;

    info!(entities = store.len(), "Collection complete");

    let snapshot = Snapshot::new(&store, info.hostname(), info.port());
    let stdout = std::io::stdout();
    snapshot
        .write_to(&mut stdout.lock(), args.pretty)
        .context("Failed to publish snapshot")?;

    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref path) = args.config {
        Config::from_file(path).context(format!("Failed to load config from {:?}", path))
    } else {
        Config::from_env().context("Failed to load config from environment")
    }
}

fn setup_logging(args: &Args, config: &Config) {
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        config.logging.level.into()
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("pgmon_agent={}", level).parse().expect("valid directive"))
        .add_directive("sqlx=warn".parse().expect("valid directive"));

    let use_json = args.json_logs || config.logging.format == pgmon_agent::config::LogFormat::Json;

    // Logs go to stderr; stdout carries the published snapshot
    if use_json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn test_connection(collector: &PostgresCollector, info: &ConnectionInfo) -> Result<()> {
    println!(
        "Testing connection to {}:{}...",
        info.hostname(),
        info.port()
    );

    match collector.test_connection().await {
        Ok(()) => {
            println!("  Database: OK");
            Ok(())
        }
        Err(e) => {
            eprintln!("  Database: FAILED - {}", e);
            Err(e.into())
        }
    }
}
