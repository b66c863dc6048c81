//! PostgreSQL connection construction.
//!
//! The collector opens one primary connection plus one short-lived
//! connection per database it iterates; this module owns how those pools
//! are built from the configured connection settings.

use crate::config::ConnectionConfig;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while opening a connection
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("failed to connect to database {database}: {source}")]
    Connect {
        database: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Everything needed to open a connection to any database on the target
/// server
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    hostname: String,
    port: u16,
    username: String,
    password: Option<String>,
    database: String,
    enable_ssl: bool,
    timeout: Duration,
}

impl ConnectionInfo {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            hostname: config.hostname.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            database: config.database.clone(),
            enable_ssl: config.enable_ssl,
            timeout: config.timeout_duration(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The database used for the primary connection
    pub fn default_database(&self) -> &str {
        &self.database
    }

    /// Open a pool against the named database
    pub async fn connect(&self, database: &str) -> Result<PgPool, ConnectionError> {
        let ssl_mode = if self.enable_ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };

        let mut options = PgConnectOptions::new()
            .host(&self.hostname)
            .port(self.port)
            .username(&self.username)
            .database(database)
            .ssl_mode(ssl_mode)
            .application_name("pgmon-agent");

        if let Some(password) = &self.password {
            options = options.password(password);
        }

        PgPoolOptions::new()
            .min_connections(1)
            .max_connections(2)
            .acquire_timeout(self.timeout)
            .connect_with(options)
            .await
            .map_err(|source| ConnectionError::Connect {
                database: database.to_string(),
                source,
            })
    }
}

/// Report whether the named extension is installed in the given schema
pub async fn has_extension(
    pool: &PgPool,
    extension: &str,
    schema: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS (
            SELECT 1
            FROM pg_extension E
            JOIN pg_namespace N ON N.oid = E.extnamespace
            WHERE E.extname = $1 AND N.nspname = $2
        )",
    )
    .bind(extension)
    .bind(schema)
    .fetch_one(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            hostname: "db.example.com".to_string(),
            port: 5433,
            username: "monitor".to_string(),
            password: Some("secret".to_string()),
            database: "postgres".to_string(),
            enable_ssl: false,
            timeout: 30,
        }
    }

    #[test]
    fn test_from_config() {
        let info = ConnectionInfo::from_config(&config());
        assert_eq!(info.hostname(), "db.example.com");
        assert_eq!(info.port(), 5433);
        assert_eq!(info.default_database(), "postgres");
        assert_eq!(info.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_connect_error_names_database() {
        let err = ConnectionError::Connect {
            database: "pgbouncer".to_string(),
            source: sqlx::Error::PoolClosed,
        };
        assert!(err.to_string().contains("pgbouncer"));
    }
}
