//! Ledger records
//!
//! These are the rows the storage layer persists. Balances and reserves are
//! mutated only through the wallet crate; trades and transfers are append-only.

use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reference::ChainSnapshot;
use crate::types::*;

/// Per-user, per-symbol available balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub user_id: UserId,
    pub symbol: String,
    pub balance: BigDecimal,
}

impl Asset {
    /// Create an empty asset row
    pub fn empty(user_id: UserId, symbol: impl Into<String>) -> Self {
        Self {
            user_id,
            symbol: symbol.into(),
            balance: BigDecimal::zero(),
        }
    }
}

/// Key that reserve locks are taken on
///
/// A key covers every address the user holds for the symbol on one
/// platform/protocol pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReserveKey {
    pub user_id: UserId,
    pub symbol: String,
    pub platform: Platform,
    pub protocol: Protocol,
}

impl ReserveKey {
    pub fn new(
        user_id: UserId,
        symbol: impl Into<String>,
        platform: Platform,
        protocol: Protocol,
    ) -> Self {
        Self {
            user_id,
            symbol: symbol.into(),
            platform,
            protocol,
        }
    }
}

impl std::fmt::Display for ReserveKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.user_id, self.symbol, self.platform, self.protocol
        )
    }
}

/// Custodial amount held at one on-chain address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reserve {
    pub id: i64,
    pub user_id: UserId,
    pub symbol: String,
    pub platform: Platform,
    pub protocol: Protocol,
    pub address: String,
    pub value: BigDecimal,
    /// Set while a withdrawal or settlement is in flight for the key
    pub lock: bool,
}

impl Reserve {
    pub fn key(&self) -> ReserveKey {
        ReserveKey::new(self.user_id, self.symbol.clone(), self.platform, self.protocol)
    }
}

/// Spot order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Store-assigned id, zero until inserted
    pub id: OrderId,
    pub user_id: UserId,
    pub base_unit: String,
    pub quote_unit: String,
    pub assigning: Assigning,
    pub order_type: OrderType,
    /// Limit price in the quote unit
    pub price: BigDecimal,
    /// Original quantity in the base unit
    pub quantity: BigDecimal,
    /// Remaining unfilled quantity in the base unit
    pub value: BigDecimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a pending order whose remaining value equals its quantity
    pub fn new(
        user_id: UserId,
        base_unit: impl Into<String>,
        quote_unit: impl Into<String>,
        assigning: Assigning,
        order_type: OrderType,
        price: BigDecimal,
        quantity: BigDecimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            user_id,
            base_unit: base_unit.into(),
            quote_unit: quote_unit.into(),
            assigning,
            order_type,
            price,
            value: quantity.clone(),
            quantity,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Trading pair in `BASE/QUOTE` form
    pub fn pair(&self) -> String {
        format!("{}/{}", self.base_unit, self.quote_unit)
    }

    /// Symbol and amount held from the balance while the order is open
    pub fn hold(&self, remaining: &BigDecimal) -> (&str, BigDecimal) {
        match self.assigning {
            Assigning::Buy => (&self.quote_unit, remaining * &self.price),
            Assigning::Sell => (&self.base_unit, remaining.clone()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Pending
    }
}

/// Append-only record of one settled match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    /// Idempotence key supplied by the matcher
    pub match_id: Uuid,
    pub maker_order_id: OrderId,
    pub taker_order_id: OrderId,
    pub assigning: Assigning,
    pub user_id: UserId,
    pub base_unit: String,
    pub quote_unit: String,
    pub quantity: BigDecimal,
    pub price: BigDecimal,
    pub fees: BigDecimal,
    pub maker: bool,
    pub created_at: DateTime<Utc>,
}

/// Append-only per-leg settlement record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: i64,
    pub trade_id: TradeId,
    pub order_id: OrderId,
    pub assigning: Assigning,
    pub user_id: UserId,
    pub base_unit: String,
    pub quote_unit: String,
    pub price: BigDecimal,
    pub quantity: BigDecimal,
    /// Fee amount charged on this leg
    pub fees: BigDecimal,
    pub maker: bool,
    pub created_at: DateTime<Utc>,
}

/// Deposit or withdraw record keyed by its chain hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub hash: String,
    pub symbol: String,
    pub value: BigDecimal,
    pub fees: BigDecimal,
    pub confirmation: i64,
    /// Destination address
    pub to: String,
    pub block: i64,
    pub chain_id: ChainId,
    pub user_id: UserId,
    pub assignment: Assignment,
    pub tx_type: TxType,
    pub platform: Platform,
    pub protocol: Protocol,
    pub allocation: Allocation,
    /// Related transaction, e.g. the withdrawal that spawned a fee collection
    pub parent: Option<TransactionId>,
    pub status: TxStatus,
    /// Chain metadata at ingestion time
    pub chain: Option<ChainSnapshot>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn reserve_key(&self) -> ReserveKey {
        ReserveKey::new(self.user_id, self.symbol.clone(), self.platform, self.protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_new_order_remaining_equals_quantity() {
        let order = Order::new(7, "btc", "usdt", Assigning::Buy, OrderType::Limit, dec("100"), dec("2"));
        assert_eq!(order.value, dec("2"));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.pair(), "btc/usdt");
    }

    #[test]
    fn test_hold_by_side() {
        let buy = Order::new(1, "btc", "usdt", Assigning::Buy, OrderType::Limit, dec("100"), dec("2"));
        assert_eq!(buy.hold(&dec("1.5")), ("usdt", dec("150")));

        let sell = Order::new(1, "btc", "usdt", Assigning::Sell, OrderType::Limit, dec("100"), dec("2"));
        assert_eq!(sell.hold(&dec("1.5")), ("btc", dec("1.5")));
    }

    #[test]
    fn test_reserve_key_display() {
        let key = ReserveKey::new(3, "usdt", Platform::Ethereum, Protocol::Erc20);
        assert_eq!(key.to_string(), "3:usdt:ethereum:erc20");
    }
}
