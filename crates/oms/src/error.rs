//! OMS error types

use common::OrderId;
use storage::StorageError;
use thiserror::Error;
use wallet::WalletError;

/// Errors that can occur in the order store
#[derive(Error, Debug)]
pub enum OmsError {
    /// Order failed validation at intake
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Order not found
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// Invalid order state transition
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Missing pair or currency reference data
    #[error("Reference data not found: {0}")]
    ReferenceNotFound(String),

    /// Pair or currency is disabled
    #[error("Not tradable: {0}")]
    NotTradable(String),

    /// Balance hold or refund failed
    #[error(transparent)]
    Wallet(#[from] WalletError),

    /// Storage error
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for OMS operations
pub type Result<T> = std::result::Result<T, OmsError>;
