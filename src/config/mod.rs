//! Configuration management for the pgmon agent.
//!
//! Supports loading configuration from:
//! - YAML config files
//! - Environment variables

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// The topology driving per-scope collection: database name → schema names.
///
/// Supplied fully formed before collection starts and treated as read-only.
pub type DatabaseList = BTreeMap<String, SchemaList>;

/// The schemas to iterate within one database
pub type SchemaList = BTreeSet<String>;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Failed to parse collection list: {0}")]
    CollectionListError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    #[serde(default)]
    pub password: Option<String>,

    /// Database used for the primary connection
    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default)]
    pub enable_ssl: bool,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl ConnectionConfig {
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Metrics collection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Databases and schemas to collect table/index metrics for
    #[serde(default)]
    pub collection_list: DatabaseList,

    /// Collect connection-pooling proxy metrics from the pgbouncer
    /// administrative database
    #[serde(default)]
    pub pgbouncer: bool,

    /// Collect per-database lock metrics (requires the tablefunc extension)
    #[serde(default)]
    pub collect_db_lock_metrics: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

// Default value functions
fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_database() -> String {
    "postgres".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        let username = std::env::var("PGMON_USERNAME")
            .map_err(|_| ConfigError::MissingField("PGMON_USERNAME".to_string()))?;

        let hostname = std::env::var("PGMON_HOSTNAME").unwrap_or_else(|_| default_hostname());

        let port = std::env::var("PGMON_PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or_else(default_port);

        let password = std::env::var("PGMON_PASSWORD").ok();

        let database = std::env::var("PGMON_DATABASE").unwrap_or_else(|_| default_database());

        let enable_ssl = std::env::var("PGMON_ENABLE_SSL")
            .ok()
            .map(|s| parse_bool(&s))
            .unwrap_or(false);

        let timeout = std::env::var("PGMON_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or_else(default_timeout);

        let collection_list = match std::env::var("PGMON_COLLECTION_LIST") {
            Ok(raw) => parse_collection_list(&raw)?,
            Err(_) => DatabaseList::new(),
        };

        let pgbouncer = std::env::var("PGMON_PGBOUNCER")
            .ok()
            .map(|s| parse_bool(&s))
            .unwrap_or(false);

        let collect_db_lock_metrics = std::env::var("PGMON_COLLECT_DB_LOCK_METRICS")
            .ok()
            .map(|s| parse_bool(&s))
            .unwrap_or(false);

        let log_level = std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(LogLevel::Trace),
                "debug" => Some(LogLevel::Debug),
                "info" => Some(LogLevel::Info),
                "warn" => Some(LogLevel::Warn),
                "error" => Some(LogLevel::Error),
                _ => None,
            })
            .unwrap_or_else(default_log_level);

        let log_format = std::env::var("LOG_FORMAT")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "json" => Some(LogFormat::Json),
                "pretty" => Some(LogFormat::Pretty),
                _ => None,
            })
            .unwrap_or_else(default_log_format);

        let config = Config {
            connection: ConnectionConfig {
                hostname,
                port,
                username,
                password,
                database,
                enable_ssl,
                timeout,
            },
            collection: CollectionConfig {
                collection_list,
                pgbouncer,
                collect_db_lock_metrics,
            },
            logging: LoggingConfig {
                level: log_level,
                format: log_format,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.hostname.is_empty() {
            return Err(ConfigError::ValidationError(
                "Hostname cannot be empty".to_string(),
            ));
        }

        if self.connection.username.is_empty() {
            return Err(ConfigError::ValidationError(
                "Username cannot be empty".to_string(),
            ));
        }

        if self.connection.database.is_empty() {
            return Err(ConfigError::ValidationError(
                "Primary database cannot be empty".to_string(),
            ));
        }

        if self.connection.timeout == 0 {
            return Err(ConfigError::ValidationError(
                "Connection timeout must be at least one second".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parse the collection-list JSON value: `{"database": ["schema", ...]}`
pub fn parse_collection_list(raw: &str) -> Result<DatabaseList, ConfigError> {
    Ok(serde_json::from_str(raw)?)
}

fn parse_bool(s: &str) -> bool {
    matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

/// Expand environment variables in a string using ${VAR} syntax
fn expand_env_vars(input: &str) -> String {
    let re = Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern");
    let mut result = input.to_string();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}
