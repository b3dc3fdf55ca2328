//! Order store for the OpenExchange spot ledger
//!
//! This crate handles the order lifecycle:
//!
//! - Intake: validation against pair and currency reference data, balance
//!   hold and insert in one transaction
//! - Fills applied by settlement inside its own transaction
//! - Cancellation with refund of the remaining hold
//! - Lookups and filtered listing

pub mod error;
pub mod manager;

pub use error::{OmsError, Result};
pub use manager::OrderManager;
pub use storage::OrderFilter;
