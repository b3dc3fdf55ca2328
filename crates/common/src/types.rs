//! Identifiers and enumerations shared across the ledger
//!
//! Every enumeration here is persisted as lowercase text, so each one
//! exposes `as_str()` and a `FromStr` impl that round-trips it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Numeric user identifier resolved by the auth collaborator
pub type UserId = i64;

/// Store-assigned identifier of an order row
pub type OrderId = i64;

/// Store-assigned identifier of a trade row
pub type TradeId = i64;

/// Store-assigned identifier of a transaction row
pub type TransactionId = i64;

/// Blockchain identifier in the `chains` reference table
pub type ChainId = i64;

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Persisted text form
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::unknown($kind, other)),
                }
            }
        }
    };
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Assigning {
    /// Buy the base unit, pay in the quote unit
    Buy,
    /// Sell the base unit, receive the quote unit
    Sell,
}

text_enum!(Assigning, "assigning", { Buy => "buy", Sell => "sell" });

impl Assigning {
    /// Returns the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Assigning::Buy => Assigning::Sell,
            Assigning::Sell => Assigning::Buy,
        }
    }

    /// Returns true if this is a buy order
    pub fn is_buy(&self) -> bool {
        matches!(self, Assigning::Buy)
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Rests on the book at its limit price
    #[default]
    Limit,
    /// Crosses immediately; the price is the worst acceptable price
    Market,
}

text_enum!(OrderType, "order type", { Limit => "limit", Market => "market" });

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Open, with a remaining unfilled value
    #[default]
    Pending,
    /// Fully filled
    Filled,
    /// Cancelled before it was fully filled
    Cancelled,
}

text_enum!(OrderStatus, "order status", {
    Pending => "pending",
    Filled => "filled",
    Cancelled => "cancelled",
});

impl OrderStatus {
    /// Whether the order can no longer change
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

/// Direction of a balance or reserve adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

text_enum!(Direction, "direction", { Credit => "credit", Debit => "debit" });

/// Blockchain platform a reserve or transaction lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Bitcoin,
    Ethereum,
    Tron,
}

text_enum!(Platform, "platform", {
    Bitcoin => "bitcoin",
    Ethereum => "ethereum",
    Tron => "tron",
});

/// Token protocol on a platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Native coin of the platform
    Mainnet,
    Erc20,
    Trc20,
    Bep20,
}

text_enum!(Protocol, "protocol", {
    Mainnet => "mainnet",
    Erc20 => "erc20",
    Trc20 => "trc20",
    Bep20 => "bep20",
});

/// Whether a transaction is internal routing or an on-chain event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Allocation {
    Internal,
    #[default]
    External,
}

text_enum!(Allocation, "allocation", { Internal => "internal", External => "external" });

/// Semantic role of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Assignment {
    Deposit,
    Withdraw,
}

text_enum!(Assignment, "assignment", { Deposit => "deposit", Withdraw => "withdraw" });

/// Transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    #[default]
    Pending,
    Confirmed,
    Failed,
}

text_enum!(TxStatus, "transaction status", {
    Pending => "pending",
    Confirmed => "confirmed",
    Failed => "failed",
});

/// Asset class of a currency or transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxType {
    #[default]
    Crypto,
    Fiat,
}

text_enum!(TxType, "transaction type", { Crypto => "crypto", Fiat => "fiat" });
