//! Settlement for the OpenExchange spot ledger
//!
//! This crate turns matched orders and chain events into durable ledger
//! changes:
//!
//! - [`FeeCalculator`] - maker/taker rates and fixed-point fee splitting
//! - [`SettlementEngine`] - all-or-nothing settlement of a maker/taker match
//! - [`TransactionReconciler`] - hash-idempotent ingestion and confirmation
//!   of deposits and withdrawals
//! - [`ChainTaskRegistry`] - one in-flight block per chain
//! - [`Notifier`] - best-effort publish seam
//! - [`LedgerWorker`] / [`LedgerHandle`] - channel-driven command execution

pub mod engine;
pub mod error;
pub mod fees;
pub mod notifier;
pub mod reconciler;
pub mod registry;
pub mod types;
pub mod worker;

pub use engine::{SettlementEngine, SettlementOptions};
pub use error::{SettlementError, SettlementWarning};
pub use fees::FeeCalculator;
pub use notifier::{
    candles_channel, Envelope, LogNotifier, MemoryNotifier, Notifier, PublishError,
    ORDER_STATUS_CHANNEL,
};
pub use reconciler::TransactionReconciler;
pub use registry::{ChainTask, ChainTaskGuard, ChainTaskRegistry};
pub use types::{
    BlockReport, ChainEvent, ConfirmOutcome, IngestOutcome, Match, MatchParams, MatchedOrder,
    SettlementOutcome, SettlementReport,
};
pub use worker::{LedgerCommand, LedgerHandle, LedgerWorker};

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, SettlementError>;
