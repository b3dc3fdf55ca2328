//! Ledger store traits
//!
//! [`LedgerStore`] serves committed snapshots and hands out [`LedgerTx`]
//! units of work. Every balance, reserve, order, trade and transaction
//! mutation goes through a `LedgerTx`, so a step either commits as a whole
//! or leaves nothing behind. Dropping a transaction without calling
//! [`LedgerTx::commit`] rolls it back.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use common::{
    Asset, Assigning, Chain, ChainId, Currency, Order, OrderId, OrderStatus, Pair,
    Platform, Protocol, Reserve, ReserveKey, Trade, TradeId, Transaction, TransactionId,
    Transfer, UserId,
};

use crate::Result;

/// Result of a compare-and-set on a reserve lock flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// Lock taken on this many reserve rows
    Acquired(u64),
    /// At least one row of the key is already locked
    Busy,
    /// The key has no reserve rows yet
    Vacant,
}

/// Result of a conditional balance debit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebitOutcome {
    /// Debited, carrying the new balance
    Applied(BigDecimal),
    /// Balance is below the amount; nothing changed
    Insufficient(BigDecimal),
    /// No asset row for the user and symbol
    Missing,
}

/// Result of a reserve upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Applied, carrying the new reserve value
    Applied(BigDecimal),
    /// The delta would drive the reserve negative; nothing changed
    Insufficient,
}

/// Predicates for listing orders
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFilter {
    pub user_id: Option<UserId>,
    pub base_unit: Option<String>,
    pub quote_unit: Option<String>,
    pub assigning: Option<Assigning>,
    /// Any of these statuses; empty matches all
    pub statuses: Vec<OrderStatus>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for OrderFilter {
    fn default() -> Self {
        Self {
            user_id: None,
            base_unit: None,
            quote_unit: None,
            assigning: None,
            statuses: Vec::new(),
            limit: 100,
            offset: 0,
        }
    }
}

impl OrderFilter {
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn pair(mut self, base_unit: impl Into<String>, quote_unit: impl Into<String>) -> Self {
        self.base_unit = Some(base_unit.into());
        self.quote_unit = Some(quote_unit.into());
        self
    }

    pub fn side(mut self, assigning: Assigning) -> Self {
        self.assigning = Some(assigning);
        self
    }

    pub fn status(mut self, status: OrderStatus) -> Self {
        self.statuses.push(status);
        self
    }

    /// Whether `order` satisfies every predicate (limit/offset aside)
    pub fn matches(&self, order: &Order) -> bool {
        self.user_id.map_or(true, |u| order.user_id == u)
            && self.base_unit.as_ref().map_or(true, |b| &order.base_unit == b)
            && self.quote_unit.as_ref().map_or(true, |q| &order.quote_unit == q)
            && self.assigning.map_or(true, |a| order.assigning == a)
            && (self.statuses.is_empty() || self.statuses.contains(&order.status))
    }
}

/// Committed-state reads and unit-of-work factory
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a new transaction
    async fn begin(&self) -> Result<Box<dyn LedgerTx>>;

    /// Available balance, `None` when the asset row does not exist
    async fn balance(&self, user_id: UserId, symbol: &str) -> Result<Option<BigDecimal>>;

    /// All asset rows of a user
    async fn assets(&self, user_id: UserId) -> Result<Vec<Asset>>;

    /// Sum of reserves across users for one symbol on one platform/protocol
    async fn reserve_total(
        &self,
        symbol: &str,
        platform: Platform,
        protocol: Protocol,
    ) -> Result<BigDecimal>;

    /// Reserve rows (one per address) under a key
    async fn reserves(&self, key: &ReserveKey) -> Result<Vec<Reserve>>;

    /// Atomically set the lock flag on every row of `key` if none is set
    async fn lock_reserve(&self, key: &ReserveKey) -> Result<LockOutcome>;

    /// Clear the lock flag; returns the number of rows touched
    async fn unlock_reserve(&self, key: &ReserveKey) -> Result<u64>;

    async fn order(&self, id: OrderId) -> Result<Option<Order>>;

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>>;

    async fn trade_by_match(&self, match_id: Uuid) -> Result<Option<Trade>>;

    /// Trades of a pair created at or after `since`, oldest first
    async fn trades_since(
        &self,
        base_unit: &str,
        quote_unit: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Trade>>;

    async fn transfers(&self, trade_id: TradeId) -> Result<Vec<Transfer>>;

    async fn transaction(&self, hash: &str) -> Result<Option<Transaction>>;

    /// Transactions whose parent is `parent_id`
    async fn children(&self, parent_id: TransactionId) -> Result<Vec<Transaction>>;

    async fn currency(&self, symbol: &str) -> Result<Option<Currency>>;

    async fn chain(&self, id: ChainId) -> Result<Option<Chain>>;

    async fn pair(&self, base_unit: &str, quote_unit: &str) -> Result<Option<Pair>>;
}

/// One atomic unit of ledger mutations
#[async_trait]
pub trait LedgerTx: Send {
    /// Create the asset row if absent; true when it was created
    async fn ensure_asset(&mut self, user_id: UserId, symbol: &str) -> Result<bool>;

    /// Balance as seen inside this transaction
    async fn balance(&mut self, user_id: UserId, symbol: &str) -> Result<Option<BigDecimal>>;

    /// Add to a balance; `None` when the asset row does not exist
    async fn credit_balance(
        &mut self,
        user_id: UserId,
        symbol: &str,
        amount: &BigDecimal,
    ) -> Result<Option<BigDecimal>>;

    /// Subtract from a balance only if it stays non-negative
    async fn debit_balance(
        &mut self,
        user_id: UserId,
        symbol: &str,
        amount: &BigDecimal,
    ) -> Result<DebitOutcome>;

    /// Insert-or-add a signed delta on the reserve at `address`
    async fn adjust_reserve(
        &mut self,
        key: &ReserveKey,
        address: &str,
        delta: &BigDecimal,
    ) -> Result<ReserveOutcome>;

    /// Insert an order and return its id
    async fn insert_order(&mut self, order: &Order) -> Result<OrderId>;

    /// Load an order and hold it against concurrent updates
    async fn order_for_update(&mut self, id: OrderId) -> Result<Option<Order>>;

    /// Write back the mutable fields of an order
    async fn update_order(&mut self, order: &Order) -> Result<()>;

    /// Insert a trade; `None` when its match id was already settled
    async fn insert_trade(&mut self, trade: &Trade) -> Result<Option<TradeId>>;

    async fn insert_transfer(&mut self, transfer: &Transfer) -> Result<i64>;

    /// Add to a currency's fee counter; false when the currency is unknown
    async fn accrue_fee(&mut self, symbol: &str, amount: &BigDecimal) -> Result<bool>;

    /// Insert a transaction unless its hash exists; returns the stored row
    async fn insert_transaction(&mut self, transaction: &Transaction)
        -> Result<Option<Transaction>>;

    /// Load a transaction by hash and hold it against concurrent updates
    async fn transaction_for_update(&mut self, hash: &str) -> Result<Option<Transaction>>;

    /// Write back the mutable fields of a transaction
    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<()>;

    /// Record the last processed block of a chain
    async fn set_chain_block(&mut self, chain_id: ChainId, block: i64) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
