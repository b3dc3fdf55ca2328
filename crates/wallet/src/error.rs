//! Wallet error types

use bigdecimal::BigDecimal;
use common::UserId;
use storage::StorageError;
use thiserror::Error;

/// Errors raised by the balance ledger and reserve manager
#[derive(Error, Debug)]
pub enum WalletError {
    /// A debit would drive the balance negative
    #[error("Insufficient balance for user {user_id} in {symbol}: available {available}, requested {requested}")]
    InsufficientBalance {
        user_id: UserId,
        symbol: String,
        available: BigDecimal,
        requested: BigDecimal,
    },

    /// A reserve debit would drive the reserve at `address` negative
    #[error("Insufficient reserve for {key} at {address}")]
    InsufficientReserve { key: String, address: String },

    /// Another operation holds the reserve lock
    #[error("Reserve busy: {0}")]
    ReserveBusy(String),

    /// Strict provisioning found an existing asset
    #[error("Asset already exists for user {user_id}: {symbol}")]
    AssetExists { user_id: UserId, symbol: String },

    #[error("Asset not found for user {user_id}: {symbol}")]
    AssetNotFound { user_id: UserId, symbol: String },

    /// Negative or otherwise unusable amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Persistence failure, surfaced verbatim
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for wallet operations
pub type Result<T> = std::result::Result<T, WalletError>;
