//! Metrics collection.
//!
//! This module defines the `Collector` trait, the collection error
//! taxonomy, and the PostgreSQL implementation.

pub mod postgres;

use crate::connection::ConnectionError;
use crate::inventory::EntityStore;
use async_trait::async_trait;
use thiserror::Error;

/// Errors that abort a collection run.
///
/// Only two failures are fatal to a run: opening the primary connection and
/// resolving the server version. Everything else is contained inside its
/// domain and reported where it happens.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Database connection failed: {0}")]
    ConnectionError(String),

    #[error("Server version detection failed: {0}")]
    VersionError(#[from] postgres::version::VersionError),

    #[error("Query execution failed: {0}")]
    QueryError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<sqlx::Error> for CollectorError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                CollectorError::QueryError(db_err.message().to_string())
            }
            sqlx::Error::Io(io_err) => CollectorError::ConnectionError(io_err.to_string()),
            sqlx::Error::PoolTimedOut => {
                CollectorError::ConnectionError("connection pool timed out".to_string())
            }
            _ => CollectorError::InternalError(err.to_string()),
        }
    }
}

impl From<ConnectionError> for CollectorError {
    fn from(err: ConnectionError) -> Self {
        CollectorError::ConnectionError(err.to_string())
    }
}

/// Trait for metrics collectors.
///
/// A collector produces one point-in-time [`EntityStore`] per call; the
/// caller hands the populated store to the publication layer.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Run one collection snapshot
    async fn collect(&self) -> Result<EntityStore, CollectorError>;

    /// Verify that the primary connection works
    async fn test_connection(&self) -> Result<(), CollectorError>;
}
