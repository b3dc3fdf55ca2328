//! Balance ledger and reserve manager for OpenExchange
//!
//! - [`BalanceLedger`] owns per-user available balances
//! - [`ReserveManager`] owns custodial on-chain reserves and their locks
//!
//! Both expose an `*_in` variant of each mutation that runs inside a
//! caller's [`storage::LedgerTx`], which is how settlement and
//! reconciliation make several adjustments commit as one.

pub mod balance;
pub mod error;
pub mod reserve;

pub use balance::{BalanceLedger, EnsureMode, EnsureOutcome};
pub use error::{Result, WalletError};
pub use reserve::ReserveManager;
