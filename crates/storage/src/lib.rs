//! Ledger persistence for OpenExchange
//!
//! This crate defines the transactional seam every ledger component writes
//! through, plus two backends:
//!
//! - [`memory::InMemoryLedgerStore`] for tests and single-process deployments
//! - `postgres::PostgresLedgerStore` (feature `postgres`) backed by `sqlx`
//!
//! # Example
//!
//! ```ignore
//! use storage::{InMemoryLedgerStore, LedgerStore};
//!
//! let store = InMemoryLedgerStore::new();
//! let mut tx = store.begin().await?;
//! tx.ensure_asset(1, "usdt").await?;
//! tx.commit().await?;
//! ```

pub mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod traits;

pub use error::StorageError;
pub use memory::InMemoryLedgerStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresLedgerStore;
pub use traits::{
    DebitOutcome, LedgerStore, LedgerTx, LockOutcome, OrderFilter, ReserveOutcome,
};

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;
