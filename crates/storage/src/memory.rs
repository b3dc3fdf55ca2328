//! In-memory ledger store for testing and development
//!
//! All tables live behind one async mutex. A transaction holds the mutex
//! for its whole lifetime and mutates a working copy, which replaces the
//! committed state on commit and is discarded otherwise. Transactions are
//! therefore serializable, at the cost of running one at a time.
//!
//! Store-level reads take the same mutex, so code holding a transaction
//! must read through it rather than through the store.

use async_trait::async_trait;
use bigdecimal::{BigDecimal, Signed, Zero};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use common::{
    Asset, Chain, ChainId, Currency, Order, OrderId, Pair, Platform, Protocol,
    ReferenceData, Reserve, ReserveKey, Trade, TradeId, Transaction, TransactionId, Transfer,
    UserId,
};

use crate::error::StorageError;
use crate::traits::{
    DebitOutcome, LedgerStore, LedgerTx, LockOutcome, OrderFilter, ReserveOutcome,
};
use crate::Result;

#[derive(Debug, Clone, Default)]
struct LedgerState {
    assets: BTreeMap<(UserId, String), BigDecimal>,
    reserves: BTreeMap<i64, Reserve>,
    orders: BTreeMap<OrderId, Order>,
    trades: BTreeMap<TradeId, Trade>,
    trades_by_match: HashMap<Uuid, TradeId>,
    transfers: Vec<Transfer>,
    transactions: BTreeMap<TransactionId, Transaction>,
    transactions_by_hash: HashMap<String, TransactionId>,
    currencies: HashMap<String, Currency>,
    chains: HashMap<ChainId, Chain>,
    pairs: HashMap<(String, String), Pair>,
    next_id: i64,
}

impl LedgerState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn reserve_rows<'a>(&'a self, key: &'a ReserveKey) -> impl Iterator<Item = &'a Reserve> {
        self.reserves.values().filter(move |r| reserve_matches(r, key))
    }
}

fn reserve_matches(reserve: &Reserve, key: &ReserveKey) -> bool {
    reserve.user_id == key.user_id
        && reserve.symbol == key.symbol
        && reserve.platform == key.platform
        && reserve.protocol == key.protocol
}

/// In-memory ledger store
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedgerStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with reference tables
    pub fn with_reference(reference: ReferenceData) -> Self {
        let mut state = LedgerState::default();
        for mut currency in reference.currencies {
            if currency.id == 0 {
                currency.id = state.next_id();
            }
            state.currencies.insert(currency.symbol.clone(), currency);
        }
        for chain in reference.chains {
            state.chains.insert(chain.id, chain);
        }
        for mut pair in reference.pairs {
            if pair.id == 0 {
                pair.id = state.next_id();
            }
            state
                .pairs
                .insert((pair.base_unit.clone(), pair.quote_unit.clone()), pair);
        }

        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Add or replace a currency
    pub async fn put_currency(&self, currency: Currency) {
        let mut state = self.state.lock().await;
        state.currencies.insert(currency.symbol.clone(), currency);
    }

    /// Add or replace a chain
    pub async fn put_chain(&self, chain: Chain) {
        let mut state = self.state.lock().await;
        state.chains.insert(chain.id, chain);
    }

    /// Add or replace a pair
    pub async fn put_pair(&self, pair: Pair) {
        let mut state = self.state.lock().await;
        state
            .pairs
            .insert((pair.base_unit.clone(), pair.quote_unit.clone()), pair);
    }

    /// Number of trade rows
    pub async fn trade_count(&self) -> usize {
        self.state.lock().await.trades.len()
    }

    /// Number of transfer rows
    pub async fn transfer_count(&self) -> usize {
        self.state.lock().await.transfers.len()
    }

    /// Number of transaction rows
    pub async fn transaction_count(&self) -> usize {
        self.state.lock().await.transactions.len()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(InMemoryLedgerTx { guard, work }))
    }

    async fn balance(&self, user_id: UserId, symbol: &str) -> Result<Option<BigDecimal>> {
        let state = self.state.lock().await;
        Ok(state.assets.get(&(user_id, symbol.to_string())).cloned())
    }

    async fn assets(&self, user_id: UserId) -> Result<Vec<Asset>> {
        let state = self.state.lock().await;
        Ok(state
            .assets
            .iter()
            .filter(|((user, _), _)| *user == user_id)
            .map(|((user, symbol), balance)| Asset {
                user_id: *user,
                symbol: symbol.clone(),
                balance: balance.clone(),
            })
            .collect())
    }

    async fn reserve_total(
        &self,
        symbol: &str,
        platform: Platform,
        protocol: Protocol,
    ) -> Result<BigDecimal> {
        let state = self.state.lock().await;
        Ok(state
            .reserves
            .values()
            .filter(|r| r.symbol == symbol && r.platform == platform && r.protocol == protocol)
            .fold(BigDecimal::zero(), |acc, r| acc + &r.value))
    }

    async fn reserves(&self, key: &ReserveKey) -> Result<Vec<Reserve>> {
        let state = self.state.lock().await;
        Ok(state.reserve_rows(key).cloned().collect())
    }

    async fn lock_reserve(&self, key: &ReserveKey) -> Result<LockOutcome> {
        let mut state = self.state.lock().await;

        let mut rows = 0u64;
        for reserve in state.reserve_rows(key) {
            if reserve.lock {
                return Ok(LockOutcome::Busy);
            }
            rows += 1;
        }
        if rows == 0 {
            return Ok(LockOutcome::Vacant);
        }

        for reserve in state.reserves.values_mut() {
            if reserve_matches(reserve, key) {
                reserve.lock = true;
            }
        }
        Ok(LockOutcome::Acquired(rows))
    }

    async fn unlock_reserve(&self, key: &ReserveKey) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut rows = 0;
        for reserve in state.reserves.values_mut() {
            if reserve_matches(reserve, key) {
                reserve.lock = false;
                rows += 1;
            }
        }
        Ok(rows)
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state.orders.get(&id).cloned())
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .rev()
            .filter(|o| filter.matches(o))
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .cloned()
            .collect())
    }

    async fn trade_by_match(&self, match_id: Uuid) -> Result<Option<Trade>> {
        let state = self.state.lock().await;
        Ok(state
            .trades_by_match
            .get(&match_id)
            .and_then(|id| state.trades.get(id))
            .cloned())
    }

    async fn trades_since(
        &self,
        base_unit: &str,
        quote_unit: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Trade>> {
        let state = self.state.lock().await;
        Ok(state
            .trades
            .values()
            .filter(|t| t.base_unit == base_unit && t.quote_unit == quote_unit)
            .filter(|t| t.created_at >= since)
            .cloned()
            .collect())
    }

    async fn transfers(&self, trade_id: TradeId) -> Result<Vec<Transfer>> {
        let state = self.state.lock().await;
        Ok(state
            .transfers
            .iter()
            .filter(|t| t.trade_id == trade_id)
            .cloned()
            .collect())
    }

    async fn transaction(&self, hash: &str) -> Result<Option<Transaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions_by_hash
            .get(hash)
            .and_then(|id| state.transactions.get(id))
            .cloned())
    }

    async fn children(&self, parent_id: TransactionId) -> Result<Vec<Transaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .values()
            .filter(|t| t.parent == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn currency(&self, symbol: &str) -> Result<Option<Currency>> {
        let state = self.state.lock().await;
        Ok(state.currencies.get(symbol).cloned())
    }

    async fn chain(&self, id: ChainId) -> Result<Option<Chain>> {
        let state = self.state.lock().await;
        Ok(state.chains.get(&id).cloned())
    }

    async fn pair(&self, base_unit: &str, quote_unit: &str) -> Result<Option<Pair>> {
        let state = self.state.lock().await;
        Ok(state
            .pairs
            .get(&(base_unit.to_string(), quote_unit.to_string()))
            .cloned())
    }
}

/// Transaction over the in-memory store
pub struct InMemoryLedgerTx {
    guard: OwnedMutexGuard<LedgerState>,
    work: LedgerState,
}

#[async_trait]
impl LedgerTx for InMemoryLedgerTx {
    async fn ensure_asset(&mut self, user_id: UserId, symbol: &str) -> Result<bool> {
        let key = (user_id, symbol.to_string());
        if self.work.assets.contains_key(&key) {
            return Ok(false);
        }
        self.work.assets.insert(key, BigDecimal::zero());
        Ok(true)
    }

    async fn balance(&mut self, user_id: UserId, symbol: &str) -> Result<Option<BigDecimal>> {
        Ok(self.work.assets.get(&(user_id, symbol.to_string())).cloned())
    }

    async fn credit_balance(
        &mut self,
        user_id: UserId,
        symbol: &str,
        amount: &BigDecimal,
    ) -> Result<Option<BigDecimal>> {
        Ok(self
            .work
            .assets
            .get_mut(&(user_id, symbol.to_string()))
            .map(|balance| {
                *balance += amount;
                balance.clone()
            }))
    }

    async fn debit_balance(
        &mut self,
        user_id: UserId,
        symbol: &str,
        amount: &BigDecimal,
    ) -> Result<DebitOutcome> {
        let Some(balance) = self.work.assets.get_mut(&(user_id, symbol.to_string())) else {
            return Ok(DebitOutcome::Missing);
        };
        if &*balance < amount {
            return Ok(DebitOutcome::Insufficient(balance.clone()));
        }
        *balance -= amount;
        Ok(DebitOutcome::Applied(balance.clone()))
    }

    async fn adjust_reserve(
        &mut self,
        key: &ReserveKey,
        address: &str,
        delta: &BigDecimal,
    ) -> Result<ReserveOutcome> {
        let existing = self
            .work
            .reserves
            .values_mut()
            .find(|r| reserve_matches(r, key) && r.address == address);

        if let Some(reserve) = existing {
            let value = &reserve.value + delta;
            if value.is_negative() {
                return Ok(ReserveOutcome::Insufficient);
            }
            reserve.value = value.clone();
            return Ok(ReserveOutcome::Applied(value));
        }

        if delta.is_negative() {
            return Ok(ReserveOutcome::Insufficient);
        }
        let id = self.work.next_id();
        self.work.reserves.insert(
            id,
            Reserve {
                id,
                user_id: key.user_id,
                symbol: key.symbol.clone(),
                platform: key.platform,
                protocol: key.protocol,
                address: address.to_string(),
                value: delta.clone(),
                lock: false,
            },
        );
        Ok(ReserveOutcome::Applied(delta.clone()))
    }

    async fn insert_order(&mut self, order: &Order) -> Result<OrderId> {
        let id = self.work.next_id();
        let mut order = order.clone();
        order.id = id;
        self.work.orders.insert(id, order);
        Ok(id)
    }

    async fn order_for_update(&mut self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.work.orders.get(&id).cloned())
    }

    async fn update_order(&mut self, order: &Order) -> Result<()> {
        let stored = self
            .work
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| StorageError::NotFound(format!("order {}", order.id)))?;
        stored.price = order.price.clone();
        stored.quantity = order.quantity.clone();
        stored.value = order.value.clone();
        stored.status = order.status;
        stored.updated_at = order.updated_at;
        Ok(())
    }

    async fn insert_trade(&mut self, trade: &Trade) -> Result<Option<TradeId>> {
        if self.work.trades_by_match.contains_key(&trade.match_id) {
            return Ok(None);
        }
        let id = self.work.next_id();
        let mut trade = trade.clone();
        trade.id = id;
        self.work.trades_by_match.insert(trade.match_id, id);
        self.work.trades.insert(id, trade);
        Ok(Some(id))
    }

    async fn insert_transfer(&mut self, transfer: &Transfer) -> Result<i64> {
        if !self.work.trades.contains_key(&transfer.trade_id) {
            return Err(StorageError::NotFound(format!("trade {}", transfer.trade_id)));
        }
        let id = self.work.next_id();
        let mut transfer = transfer.clone();
        transfer.id = id;
        self.work.transfers.push(transfer);
        Ok(id)
    }

    async fn accrue_fee(&mut self, symbol: &str, amount: &BigDecimal) -> Result<bool> {
        Ok(match self.work.currencies.get_mut(symbol) {
            Some(currency) => {
                currency.fees_charges += amount;
                true
            }
            None => false,
        })
    }

    async fn insert_transaction(
        &mut self,
        transaction: &Transaction,
    ) -> Result<Option<Transaction>> {
        if self.work.transactions_by_hash.contains_key(&transaction.hash) {
            return Ok(None);
        }
        if let Some(parent) = transaction.parent {
            if !self.work.transactions.contains_key(&parent) {
                return Err(StorageError::NotFound(format!("parent transaction {}", parent)));
            }
        }
        let id = self.work.next_id();
        let mut transaction = transaction.clone();
        transaction.id = id;
        self.work
            .transactions_by_hash
            .insert(transaction.hash.clone(), id);
        self.work.transactions.insert(id, transaction.clone());
        Ok(Some(transaction))
    }

    async fn transaction_for_update(&mut self, hash: &str) -> Result<Option<Transaction>> {
        Ok(self
            .work
            .transactions_by_hash
            .get(hash)
            .and_then(|id| self.work.transactions.get(id))
            .cloned())
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        let stored = self
            .work
            .transactions
            .get_mut(&transaction.id)
            .ok_or_else(|| StorageError::NotFound(format!("transaction {}", transaction.id)))?;
        stored.fees = transaction.fees.clone();
        stored.confirmation = transaction.confirmation;
        stored.block = transaction.block;
        stored.assignment = transaction.assignment;
        stored.allocation = transaction.allocation;
        stored.parent = transaction.parent;
        stored.status = transaction.status;
        Ok(())
    }

    async fn set_chain_block(&mut self, chain_id: ChainId, block: i64) -> Result<()> {
        if let Some(chain) = self.work.chains.get_mut(&chain_id) {
            chain.block = chain.block.max(block);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryLedgerTx { mut guard, work } = *self;
        *guard = work;
        debug!("in-memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!("in-memory transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use common::{Assigning, OrderType};

    fn key() -> ReserveKey {
        ReserveKey::new(1, "usdt", Platform::Ethereum, Protocol::Erc20)
    }

    #[tokio::test]
    async fn test_uncommitted_transaction_is_discarded() {
        let store = InMemoryLedgerStore::new();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.ensure_asset(1, "btc").await.unwrap());
        tx.credit_balance(1, "btc", &BigDecimal::from(5)).await.unwrap();
        drop(tx);

        assert_eq!(store.balance(1, "btc").await.unwrap(), None);

        let mut tx = store.begin().await.unwrap();
        tx.ensure_asset(1, "btc").await.unwrap();
        tx.credit_balance(1, "btc", &BigDecimal::from(5)).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.balance(1, "btc").await.unwrap(), Some(BigDecimal::from(5)));
    }

    #[tokio::test]
    async fn test_debit_outcomes() {
        let store = InMemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();

        assert_matches!(
            tx.debit_balance(1, "btc", &BigDecimal::from(1)).await.unwrap(),
            DebitOutcome::Missing
        );

        tx.ensure_asset(1, "btc").await.unwrap();
        tx.credit_balance(1, "btc", &BigDecimal::from(10)).await.unwrap();
        assert_matches!(
            tx.debit_balance(1, "btc", &BigDecimal::from(15)).await.unwrap(),
            DebitOutcome::Insufficient(b) if b == BigDecimal::from(10)
        );
        assert_matches!(
            tx.debit_balance(1, "btc", &BigDecimal::from(4)).await.unwrap(),
            DebitOutcome::Applied(b) if b == BigDecimal::from(6)
        );
    }

    #[tokio::test]
    async fn test_reserve_upsert_and_lock() {
        let store = InMemoryLedgerStore::new();
        assert_eq!(store.lock_reserve(&key()).await.unwrap(), LockOutcome::Vacant);

        let mut tx = store.begin().await.unwrap();
        assert_matches!(
            tx.adjust_reserve(&key(), "0xabc", &BigDecimal::from(-1)).await.unwrap(),
            ReserveOutcome::Insufficient
        );
        tx.adjust_reserve(&key(), "0xabc", &BigDecimal::from(3)).await.unwrap();
        tx.adjust_reserve(&key(), "0xabc", &BigDecimal::from(2)).await.unwrap();
        tx.adjust_reserve(&key(), "0xdef", &BigDecimal::from(1)).await.unwrap();
        tx.commit().await.unwrap();

        let rows = store.reserves(&key()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            store
                .reserve_total("usdt", Platform::Ethereum, Protocol::Erc20)
                .await
                .unwrap(),
            BigDecimal::from(6)
        );

        assert_eq!(store.lock_reserve(&key()).await.unwrap(), LockOutcome::Acquired(2));
        assert_eq!(store.lock_reserve(&key()).await.unwrap(), LockOutcome::Busy);
        assert_eq!(store.unlock_reserve(&key()).await.unwrap(), 2);
        assert_eq!(store.lock_reserve(&key()).await.unwrap(), LockOutcome::Acquired(2));
    }

    #[tokio::test]
    async fn test_trade_match_id_is_unique() {
        let store = InMemoryLedgerStore::new();
        let trade = Trade {
            id: 0,
            match_id: Uuid::new_v4(),
            maker_order_id: 1,
            taker_order_id: 2,
            assigning: Assigning::Buy,
            user_id: 1,
            base_unit: "btc".to_string(),
            quote_unit: "usdt".to_string(),
            quantity: BigDecimal::from(1),
            price: BigDecimal::from(100),
            fees: BigDecimal::zero(),
            maker: true,
            created_at: Utc::now(),
        };

        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_trade(&trade).await.unwrap().is_some());
        assert!(tx.insert_trade(&trade).await.unwrap().is_none());
        tx.commit().await.unwrap();

        assert_eq!(store.trade_count().await, 1);
        assert!(store.trade_by_match(trade.match_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_orders_filters_newest_first() {
        let store = InMemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        for user in [1, 2, 1] {
            let order = Order::new(
                user,
                "btc",
                "usdt",
                Assigning::Buy,
                OrderType::Limit,
                BigDecimal::from(100),
                BigDecimal::from(1),
            );
            tx.insert_order(&order).await.unwrap();
        }
        tx.commit().await.unwrap();

        let orders = store.list_orders(&OrderFilter::for_user(1)).await.unwrap();
        assert_eq!(orders.len(), 2);
        assert!(orders[0].id > orders[1].id);
    }
}
