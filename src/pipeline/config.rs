//! Runtime configuration from environment variables

use std::env;
use std::str::FromStr;

pub const DEFAULT_PROCESS_INTERVAL_MS: u64 = 3_000;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;

/// Aggregator cadence and batch bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Timer period in milliseconds
    pub interval_ms: u64,

    /// Maximum events drained per tick
    pub max_batch_size: usize,
}

impl AggregatorConfig {
    pub fn new(interval_ms: u64, max_batch_size: usize) -> Result<Self, ConfigError> {
        if interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "process interval must be greater than 0ms".to_string(),
            ));
        }
        if max_batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "max batch size must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            interval_ms,
            max_batch_size,
        })
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_PROCESS_INTERVAL_MS,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendType {
    Memory,
    Sqlite,
}

impl FromStr for BackendType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(BackendType::Memory),
            "sqlite" => Ok(BackendType::Sqlite),
            other => Err(ConfigError::InvalidValue(format!(
                "PLAYFLOW_BACKEND must be 'memory' or 'sqlite', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Configuration for the play runtime
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub aggregator: AggregatorConfig,

    pub backend: BackendType,

    /// SQLite database file (sqlite backend only)
    pub db_path: String,

    /// Directory holding `*.sql` schema files
    pub schema_dir: String,

    /// Optional JSONL device log to tail for events
    pub event_log_path: Option<String>,

    /// Where the campaign report JSON is written
    pub report_path: String,

    /// Campaign report refresh interval in milliseconds
    pub report_interval_ms: u64,
}

impl RuntimeConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `PLAYFLOW_PROCESS_INTERVAL_MS` (default: 3000)
    /// - `PLAYFLOW_MAX_BATCH_SIZE` (default: 10)
    /// - `PLAYFLOW_BACKEND` (default: memory)
    /// - `PLAYFLOW_DB_PATH` (default: data/playflow.db)
    /// - `PLAYFLOW_SCHEMA_DIR` (default: sql)
    /// - `PLAYFLOW_EVENT_LOG` (default: unset, no tailing)
    /// - `PLAYFLOW_REPORT_PATH` (default: campaigns.json)
    /// - `PLAYFLOW_REPORT_INTERVAL_MS` (default: 10000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let aggregator = AggregatorConfig::new(
            parse_or_default("PLAYFLOW_PROCESS_INTERVAL_MS", DEFAULT_PROCESS_INTERVAL_MS),
            parse_or_default("PLAYFLOW_MAX_BATCH_SIZE", DEFAULT_MAX_BATCH_SIZE),
        )?;

        let backend = match env::var("PLAYFLOW_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => BackendType::Memory,
        };

        let report_interval_ms = parse_or_default("PLAYFLOW_REPORT_INTERVAL_MS", 10_000u64);
        if report_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "PLAYFLOW_REPORT_INTERVAL_MS must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            aggregator,
            backend,
            db_path: env::var("PLAYFLOW_DB_PATH")
                .unwrap_or_else(|_| "data/playflow.db".to_string()),
            schema_dir: env::var("PLAYFLOW_SCHEMA_DIR").unwrap_or_else(|_| "sql".to_string()),
            event_log_path: env::var("PLAYFLOW_EVENT_LOG")
                .ok()
                .filter(|path| !path.trim().is_empty()),
            report_path: env::var("PLAYFLOW_REPORT_PATH")
                .unwrap_or_else(|_| "campaigns.json".to_string()),
            report_interval_ms,
        })
    }
}

/// Parse a numeric env var, falling back to `default` (with a warning) on garbage
fn parse_or_default<T: FromStr + std::fmt::Display + Copy>(var: &str, default: T) -> T {
    match env::var(var) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("Invalid {} '{}', defaulting to {}", var, raw, default);
            default
        }),
        Err(_) => default,
    }
}
