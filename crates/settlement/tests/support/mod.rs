#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use common::{
    Asset, Assigning, Chain, ChainId, Currency, Direction, Order, OrderId, OrderType, Pair,
    Platform, Protocol, Reserve, ReserveKey, Trade, TradeId, Transaction, TransactionId,
    Transfer, UserId,
};
use oms::OrderManager;
use settlement::{MemoryNotifier, SettlementEngine, SettlementOptions, TransactionReconciler};
use storage::{
    DebitOutcome, InMemoryLedgerStore, LedgerStore, LedgerTx, LockOutcome, OrderFilter,
    ReserveOutcome,
};
use wallet::{BalanceLedger, EnsureMode};

pub const TRON: i64 = 2;

pub fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

pub struct Ledger {
    pub store: Arc<InMemoryLedgerStore>,
    pub notifier: MemoryNotifier,
    pub engine: SettlementEngine,
    pub reconciler: TransactionReconciler,
    pub orders: OrderManager,
    pub balances: BalanceLedger,
}

/// BTC/USDT market (taker 0.2%, maker 0.1%) plus a Tron chain needing 3 confirmations
pub async fn ledger() -> Ledger {
    let store = reference_store().await;
    build(store.clone(), store, Duration::from_secs(5))
}

/// Same market, with every component writing through a [`StallingStore`]
/// and giving up after `timeout`
pub async fn stalling_ledger(timeout: Duration) -> (Ledger, Arc<StallingStore>) {
    let store = reference_store().await;
    let stalling = Arc::new(StallingStore::new(store.clone()));
    (build(store, stalling.clone(), timeout), stalling)
}

async fn reference_store() -> Arc<InMemoryLedgerStore> {
    let store = Arc::new(InMemoryLedgerStore::with_reference(
        config::generate_default_config().reference,
    ));
    let tron: Chain = serde_json::from_value(serde_json::json!({
        "id": TRON,
        "name": "Tron",
        "rpc": "https://tron.internal:8090",
        "platform": "tron",
        "confirmation": 3,
        "block": 100
    }))
    .unwrap();
    store.put_chain(tron).await;
    store
}

fn build(store: Arc<InMemoryLedgerStore>, backend: Arc<dyn LedgerStore>, timeout: Duration) -> Ledger {
    let notifier = MemoryNotifier::new();
    let options = SettlementOptions {
        operation_timeout: timeout,
        ..SettlementOptions::default()
    };
    let engine = SettlementEngine::new(backend.clone(), Arc::new(notifier.clone()), options);
    let reconciler = TransactionReconciler::new(backend.clone(), timeout);
    let balances = BalanceLedger::new(backend.clone());
    let orders = OrderManager::new(backend, balances.clone());

    Ledger {
        store,
        notifier,
        engine,
        reconciler,
        orders,
        balances,
    }
}

impl Ledger {
    pub async fn fund(&self, user_id: i64, symbol: &str, amount: &str) {
        self.balances
            .ensure_asset(user_id, symbol, EnsureMode::Lazy)
            .await
            .unwrap();
        self.balances
            .adjust(user_id, symbol, &dec(amount), Direction::Credit)
            .await
            .unwrap();
    }

    /// Committed balance, zero when the asset row does not exist yet
    pub async fn balance(&self, user_id: i64, symbol: &str) -> BigDecimal {
        self.store
            .balance(user_id, symbol)
            .await
            .unwrap()
            .unwrap_or_default()
    }

    pub async fn submit(&self, user_id: i64, assigning: Assigning, price: &str, quantity: &str) -> Order {
        let order = Order::new(
            user_id,
            "btc",
            "usdt",
            assigning,
            OrderType::Limit,
            dec(price),
            dec(quantity),
        );
        self.orders.submit(order).await.unwrap()
    }
}

/// Store whose transactions can be made to hang on commit
///
/// Everything else is served by the wrapped in-memory store.
pub struct StallingStore {
    inner: Arc<InMemoryLedgerStore>,
    commit_delay: Arc<Mutex<Option<Duration>>>,
}

impl StallingStore {
    pub fn new(inner: Arc<InMemoryLedgerStore>) -> Self {
        Self {
            inner,
            commit_delay: Arc::new(Mutex::new(None)),
        }
    }

    /// Delay every later commit by `delay`; `None` restores normal commits
    pub fn stall_commits(&self, delay: Option<Duration>) {
        *self.commit_delay.lock() = delay;
    }
}

#[async_trait]
impl LedgerStore for StallingStore {
    async fn begin(&self) -> storage::Result<Box<dyn LedgerTx>> {
        let inner = self.inner.begin().await?;
        Ok(Box::new(StallingTx {
            inner,
            commit_delay: self.commit_delay.clone(),
        }))
    }

    async fn balance(&self, user_id: UserId, symbol: &str) -> storage::Result<Option<BigDecimal>> {
        self.inner.balance(user_id, symbol).await
    }

    async fn assets(&self, user_id: UserId) -> storage::Result<Vec<Asset>> {
        self.inner.assets(user_id).await
    }

    async fn reserve_total(
        &self,
        symbol: &str,
        platform: Platform,
        protocol: Protocol,
    ) -> storage::Result<BigDecimal> {
        self.inner.reserve_total(symbol, platform, protocol).await
    }

    async fn reserves(&self, key: &ReserveKey) -> storage::Result<Vec<Reserve>> {
        self.inner.reserves(key).await
    }

    async fn lock_reserve(&self, key: &ReserveKey) -> storage::Result<LockOutcome> {
        self.inner.lock_reserve(key).await
    }

    async fn unlock_reserve(&self, key: &ReserveKey) -> storage::Result<u64> {
        self.inner.unlock_reserve(key).await
    }

    async fn order(&self, id: OrderId) -> storage::Result<Option<Order>> {
        self.inner.order(id).await
    }

    async fn list_orders(&self, filter: &OrderFilter) -> storage::Result<Vec<Order>> {
        self.inner.list_orders(filter).await
    }

    async fn trade_by_match(&self, match_id: Uuid) -> storage::Result<Option<Trade>> {
        self.inner.trade_by_match(match_id).await
    }

    async fn trades_since(
        &self,
        base_unit: &str,
        quote_unit: &str,
        since: DateTime<Utc>,
    ) -> storage::Result<Vec<Trade>> {
        self.inner.trades_since(base_unit, quote_unit, since).await
    }

    async fn transfers(&self, trade_id: TradeId) -> storage::Result<Vec<Transfer>> {
        self.inner.transfers(trade_id).await
    }

    async fn transaction(&self, hash: &str) -> storage::Result<Option<Transaction>> {
        self.inner.transaction(hash).await
    }

    async fn children(&self, parent_id: TransactionId) -> storage::Result<Vec<Transaction>> {
        self.inner.children(parent_id).await
    }

    async fn currency(&self, symbol: &str) -> storage::Result<Option<Currency>> {
        self.inner.currency(symbol).await
    }

    async fn chain(&self, id: ChainId) -> storage::Result<Option<Chain>> {
        self.inner.chain(id).await
    }

    async fn pair(&self, base_unit: &str, quote_unit: &str) -> storage::Result<Option<Pair>> {
        self.inner.pair(base_unit, quote_unit).await
    }
}

struct StallingTx {
    inner: Box<dyn LedgerTx>,
    commit_delay: Arc<Mutex<Option<Duration>>>,
}

#[async_trait]
impl LedgerTx for StallingTx {
    async fn ensure_asset(&mut self, user_id: UserId, symbol: &str) -> storage::Result<bool> {
        self.inner.ensure_asset(user_id, symbol).await
    }

    async fn balance(&mut self, user_id: UserId, symbol: &str) -> storage::Result<Option<BigDecimal>> {
        self.inner.balance(user_id, symbol).await
    }

    async fn credit_balance(
        &mut self,
        user_id: UserId,
        symbol: &str,
        amount: &BigDecimal,
    ) -> storage::Result<Option<BigDecimal>> {
        self.inner.credit_balance(user_id, symbol, amount).await
    }

    async fn debit_balance(
        &mut self,
        user_id: UserId,
        symbol: &str,
        amount: &BigDecimal,
    ) -> storage::Result<DebitOutcome> {
        self.inner.debit_balance(user_id, symbol, amount).await
    }

    async fn adjust_reserve(
        &mut self,
        key: &ReserveKey,
        address: &str,
        delta: &BigDecimal,
    ) -> storage::Result<ReserveOutcome> {
        self.inner.adjust_reserve(key, address, delta).await
    }

    async fn insert_order(&mut self, order: &Order) -> storage::Result<OrderId> {
        self.inner.insert_order(order).await
    }

    async fn order_for_update(&mut self, id: OrderId) -> storage::Result<Option<Order>> {
        self.inner.order_for_update(id).await
    }

    async fn update_order(&mut self, order: &Order) -> storage::Result<()> {
        self.inner.update_order(order).await
    }

    async fn insert_trade(&mut self, trade: &Trade) -> storage::Result<Option<TradeId>> {
        self.inner.insert_trade(trade).await
    }

    async fn insert_transfer(&mut self, transfer: &Transfer) -> storage::Result<i64> {
        self.inner.insert_transfer(transfer).await
    }

    async fn accrue_fee(&mut self, symbol: &str, amount: &BigDecimal) -> storage::Result<bool> {
        self.inner.accrue_fee(symbol, amount).await
    }

    async fn insert_transaction(
        &mut self,
        transaction: &Transaction,
    ) -> storage::Result<Option<Transaction>> {
        self.inner.insert_transaction(transaction).await
    }

    async fn transaction_for_update(&mut self, hash: &str) -> storage::Result<Option<Transaction>> {
        self.inner.transaction_for_update(hash).await
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> storage::Result<()> {
        self.inner.update_transaction(transaction).await
    }

    async fn set_chain_block(&mut self, chain_id: ChainId, block: i64) -> storage::Result<()> {
        self.inner.set_chain_block(chain_id, block).await
    }

    async fn commit(self: Box<Self>) -> storage::Result<()> {
        let delay = *self.commit_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> storage::Result<()> {
        self.inner.rollback().await
    }
}
