//! Settlement error types

use std::time::Duration;

use common::ChainId;
use oms::OmsError;
use storage::StorageError;
use thiserror::Error;
use wallet::WalletError;

/// Errors that abort a settlement or reconciliation step
///
/// Any of these means nothing was committed.
#[derive(Error, Debug)]
pub enum SettlementError {
    /// Match is malformed or inconsistent with its orders
    #[error("Invalid match: {0}")]
    InvalidMatch(String),

    /// Chain event cannot be ingested
    #[error("Invalid chain event: {0}")]
    InvalidEvent(String),

    /// Missing currency, pair, chain or transaction
    #[error("Not found: {0}")]
    NotFound(String),

    /// Another batch for this chain is in flight
    #[error("Chain {0} already has a batch in flight")]
    ChainBusy(ChainId),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid settlement configuration: {0}")]
    Config(String),

    /// The worker stopped before replying
    #[error("Ledger worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error(transparent)]
    Order(#[from] OmsError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SettlementError {
    /// Stable machine-readable code for callers deciding retry vs cancel
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::InvalidMatch(_) => "invalid_match",
            SettlementError::InvalidEvent(_) => "invalid_event",
            SettlementError::NotFound(_) => "not_found",
            SettlementError::ChainBusy(_) => "chain_busy",
            SettlementError::Timeout(_) => "timeout",
            SettlementError::Config(_) => "invalid_config",
            SettlementError::WorkerUnavailable(_) => "worker_unavailable",
            SettlementError::Order(e) => order_code(e),
            SettlementError::Wallet(e) => wallet_code(e),
            SettlementError::Storage(_) => "storage_failure",
        }
    }

    /// Whether the same request may succeed if sent again unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code(),
            "reserve_busy" | "chain_busy" | "timeout" | "storage_failure" | "worker_unavailable"
        )
    }
}

fn order_code(error: &OmsError) -> &'static str {
    match error {
        OmsError::InvalidOrder(_) => "invalid_order",
        OmsError::NotFound(_) | OmsError::ReferenceNotFound(_) => "not_found",
        OmsError::InvalidState(_) => "invalid_state",
        OmsError::NotTradable(_) => "not_tradable",
        OmsError::Wallet(e) => wallet_code(e),
        OmsError::Storage(_) => "storage_failure",
    }
}

fn wallet_code(error: &WalletError) -> &'static str {
    match error {
        WalletError::InsufficientBalance { .. } => "insufficient_balance",
        WalletError::InsufficientReserve { .. } => "insufficient_reserve",
        WalletError::ReserveBusy(_) => "reserve_busy",
        WalletError::AssetExists { .. } => "asset_exists",
        WalletError::AssetNotFound { .. } => "not_found",
        WalletError::InvalidAmount(_) => "invalid_amount",
        WalletError::Storage(_) => "storage_failure",
    }
}

/// Non-fatal problem reported alongside a committed result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementWarning {
    /// A notification could not be delivered; the ledger write stands
    PublishFailed {
        topic: String,
        channel: String,
        message: String,
    },
}

impl std::fmt::Display for SettlementWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettlementWarning::PublishFailed {
                topic,
                channel,
                message,
            } => write!(f, "publish to {}/{} failed: {}", topic, channel, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    #[test]
    fn test_codes_see_through_wrappers() {
        let busy = SettlementError::from(WalletError::ReserveBusy("1:usdt:tron:trc20".to_string()));
        assert_eq!(busy.code(), "reserve_busy");
        assert!(busy.is_retryable());

        let short = SettlementError::from(OmsError::Wallet(WalletError::InsufficientBalance {
            user_id: 1,
            symbol: "usdt".to_string(),
            available: BigDecimal::from(10),
            requested: BigDecimal::from(15),
        }));
        assert_eq!(short.code(), "insufficient_balance");
        assert!(!short.is_retryable());

        assert_eq!(SettlementError::ChainBusy(3).code(), "chain_busy");
        assert_eq!(SettlementError::NotFound("currency eur".to_string()).code(), "not_found");
    }
}
