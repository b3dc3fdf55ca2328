//! Configuration for the OpenExchange spot ledger
//!
//! A single YAML file with `${VAR}` / `$VAR` environment substitution:
//!
//! ```yaml
//! service:
//!   name: ledgerd
//!   environment: development
//! storage:
//!   backend: postgres
//!   postgres:
//!     url: ${DATABASE_URL}
//! settlement:
//!   operation_timeout_ms: 5000
//!   candle_resolutions: ["1m", "1h"]
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod defaults;
pub mod parser;
pub mod substitution;
pub mod validator;

pub use common::ReferenceData;
pub use defaults::*;
pub use parser::*;
pub use substitution::*;
pub use validator::*;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Reference tables seeded into the store at start-up
    #[serde(default)]
    pub reference: ReferenceData,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default)]
    pub environment: Environment,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Production,
    Staging,
    #[default]
    Development,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// `pretty`, `json` or `compact`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostgresConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connection_timeout")]
    pub connect_timeout_secs: u64,
    /// Apply the schema on start-up
    #[serde(default)]
    pub run_migrations: bool,
}

impl PostgresConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SettlementConfig {
    /// Upper bound on one settlement or reconciliation step
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Commands the worker runs concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Buffered commands before senders wait
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Resolutions refreshed after each trade (`1m`, `5m`, `15m`, `1h`, `4h`, `1d`)
    #[serde(default = "default_candle_resolutions")]
    pub candle_resolutions: Vec<String>,
    /// Candles published per resolution
    #[serde(default = "default_candle_limit")]
    pub candle_limit: usize,
    #[serde(default = "default_exchange_topic")]
    pub exchange_topic: String,
    #[serde(default = "default_enabled")]
    pub notifications_enabled: bool,
}

impl SettlementConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: default_operation_timeout_ms(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            candle_resolutions: default_candle_resolutions(),
            candle_limit: default_candle_limit(),
            exchange_topic: default_exchange_topic(),
            notifications_enabled: default_enabled(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}
