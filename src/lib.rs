//! pgmon-agent - Entity-scoped PostgreSQL metrics snapshots.
//!
//! This crate polls a PostgreSQL server and its managed objects (databases,
//! schemas, tables, indexes, and an optional PgBouncer proxy) and produces
//! a normalized set of metric samples, each attached to a hierarchically
//! identified monitored entity.
//!
//! # Example
//!
//! ```no_run
//! use pgmon_agent::collector::postgres::PostgresCollector;
//! use pgmon_agent::collector::Collector;
//! use pgmon_agent::config::Config;
//! use pgmon_agent::connection::ConnectionInfo;
//! use pgmon_agent::publish::Snapshot;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let info = ConnectionInfo::from_config(&config.connection);
//!
//!     let collector = PostgresCollector::new(
//!         info.clone(),
//!         config.collection.collection_list.clone(),
//!         config.collection.pgbouncer,
//!         config.collection.collect_db_lock_metrics,
//!     );
//!
//!     let store = collector.collect().await?;
//!     let snapshot = Snapshot::new(&store, info.hostname(), info.port());
//!     println!("{}", snapshot.to_json_pretty()?);
//!     Ok(())
//! }
//! ```

pub mod collector;
pub mod config;
pub mod connection;
pub mod inventory;
pub mod publish;

pub use config::Config;
