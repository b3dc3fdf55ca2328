//! Common types and utilities for the OpenExchange spot ledger
//!
//! This crate provides shared types used across all ledger crates.
//!
//! # Modules
//!
//! - [`error`] - Common error types
//! - [`types`] - Identifiers and enumerations (Assigning, Platform, TxStatus, ...)
//! - [`models`] - Ledger records (Asset, Reserve, Order, Trade, Transfer, Transaction)
//! - [`reference`] - Read-mostly reference data (Currency, Chain, Pair, Contract)
//! - [`decimal`] - Fixed-point amount helpers

pub mod decimal;
pub mod error;
pub mod models;
pub mod reference;
pub mod types;

pub use bigdecimal::BigDecimal;
pub use error::{Error, Result};
pub use models::*;
pub use reference::*;
pub use types::*;
