//! Observability for the OpenExchange ledger
//!
//! - Structured logging via `tracing`
//! - Prometheus metrics via the `metrics` facade
//!
//! ```ignore
//! use observability::{init_logging, LogFormat};
//!
//! init_logging("ledgerd", LogFormat::Pretty)?;
//! observability::init_metrics(9090)?;
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{init_metrics, LedgerMetrics, SettlementTimer};
