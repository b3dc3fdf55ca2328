//! PostgreSQL ledger store implementation
//!
//! Every statement is parameterised. Optional order filters are assembled
//! with `QueryBuilder::push_bind`, never by formatting values into SQL.

use async_trait::async_trait;
use bigdecimal::{BigDecimal, Signed};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use common::{
    Asset, Chain, ChainId, ChainSnapshot, Currency, Order, OrderId, Pair, Platform,
    Protocol, Reserve, ReserveKey, Trade, TradeId, Transaction, TransactionId, Transfer, UserId,
};

use crate::error::StorageError;
use crate::traits::{
    DebitOutcome, LedgerStore, LedgerTx, LockOutcome, OrderFilter, ReserveOutcome,
};
use crate::Result;

const SCHEMA: &str = include_str!("../../../migrations/001_create_ledger.sql");

const RESERVE_KEY: &str = "user_id = $1 AND symbol = $2 AND platform = $3 AND protocol = $4";

/// PostgreSQL ledger store
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Connect a pool to `url`
    pub async fn connect(url: &str, max_connections: u32, connect_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the ledger schema; idempotent
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        info!("Ledger schema applied");
        Ok(())
    }

    /// Insert or replace reference rows
    pub async fn seed_reference(&self, reference: &common::ReferenceData) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for c in &reference.currencies {
            sqlx::query(
                r#"
                INSERT INTO currencies (
                    name, symbol, min_withdraw, max_withdraw, min_trade, max_trade,
                    fees_trade, fees_discount, fees_charges, fees_costs, marker, status,
                    tx_type, chains
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                ON CONFLICT (symbol) DO UPDATE SET
                    name = EXCLUDED.name,
                    min_withdraw = EXCLUDED.min_withdraw,
                    max_withdraw = EXCLUDED.max_withdraw,
                    min_trade = EXCLUDED.min_trade,
                    max_trade = EXCLUDED.max_trade,
                    fees_trade = EXCLUDED.fees_trade,
                    fees_discount = EXCLUDED.fees_discount,
                    fees_costs = EXCLUDED.fees_costs,
                    marker = EXCLUDED.marker,
                    status = EXCLUDED.status,
                    tx_type = EXCLUDED.tx_type,
                    chains = EXCLUDED.chains
                "#,
            )
            .bind(&c.name)
            .bind(&c.symbol)
            .bind(&c.min_withdraw)
            .bind(&c.max_withdraw)
            .bind(&c.min_trade)
            .bind(&c.max_trade)
            .bind(&c.fees_trade)
            .bind(&c.fees_discount)
            .bind(&c.fees_charges)
            .bind(&c.fees_costs)
            .bind(c.marker)
            .bind(c.status)
            .bind(c.tx_type.as_str())
            .bind(&c.chains)
            .execute(&mut *tx)
            .await?;
        }

        for c in &reference.chains {
            sqlx::query(
                r#"
                INSERT INTO chains (
                    id, name, rpc, block, network, explorer_link, platform, confirmation,
                    time_withdraw, fees, tag, parent_symbol, decimals, status
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    rpc = EXCLUDED.rpc,
                    network = EXCLUDED.network,
                    explorer_link = EXCLUDED.explorer_link,
                    platform = EXCLUDED.platform,
                    confirmation = EXCLUDED.confirmation,
                    time_withdraw = EXCLUDED.time_withdraw,
                    fees = EXCLUDED.fees,
                    tag = EXCLUDED.tag,
                    parent_symbol = EXCLUDED.parent_symbol,
                    decimals = EXCLUDED.decimals,
                    status = EXCLUDED.status
                "#,
            )
            .bind(c.id)
            .bind(&c.name)
            .bind(&c.rpc)
            .bind(c.block)
            .bind(&c.network)
            .bind(&c.explorer_link)
            .bind(c.platform.as_str())
            .bind(c.confirmation)
            .bind(c.time_withdraw)
            .bind(&c.fees)
            .bind(&c.tag)
            .bind(&c.parent_symbol)
            .bind(c.decimals as i32)
            .bind(c.status)
            .execute(&mut *tx)
            .await?;
        }

        for p in &reference.pairs {
            sqlx::query(
                r#"
                INSERT INTO pairs (base_unit, quote_unit, price, base_decimal, quote_decimal, status)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (base_unit, quote_unit) DO UPDATE SET
                    price = EXCLUDED.price,
                    base_decimal = EXCLUDED.base_decimal,
                    quote_decimal = EXCLUDED.quote_decimal,
                    status = EXCLUDED.status
                "#,
            )
            .bind(&p.base_unit)
            .bind(&p.quote_unit)
            .bind(&p.price)
            .bind(p.base_decimal as i32)
            .bind(p.quote_decimal as i32)
            .bind(p.status)
            .execute(&mut *tx)
            .await?;
        }

        for c in &reference.contracts {
            sqlx::query(
                r#"
                INSERT INTO contracts (symbol, chain_id, address, fees, protocol, decimals, platform)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (symbol, chain_id) DO UPDATE SET
                    address = EXCLUDED.address,
                    fees = EXCLUDED.fees,
                    protocol = EXCLUDED.protocol,
                    decimals = EXCLUDED.decimals,
                    platform = EXCLUDED.platform
                "#,
            )
            .bind(&c.symbol)
            .bind(c.chain_id)
            .bind(&c.address)
            .bind(&c.fees)
            .bind(c.protocol.as_str())
            .bind(c.decimals as i32)
            .bind(c.platform.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Transaction(e.to_string()))?;
        Ok(Box::new(PostgresLedgerTx { tx }))
    }

    async fn balance(&self, user_id: UserId, symbol: &str) -> Result<Option<BigDecimal>> {
        let balance = sqlx::query_scalar("SELECT balance FROM assets WHERE user_id = $1 AND symbol = $2")
            .bind(user_id)
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        Ok(balance)
    }

    async fn assets(&self, user_id: UserId) -> Result<Vec<Asset>> {
        let rows = sqlx::query("SELECT user_id, symbol, balance FROM assets WHERE user_id = $1 ORDER BY symbol")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<Asset> {
                Ok(Asset {
                    user_id: row.try_get("user_id")?,
                    symbol: row.try_get("symbol")?,
                    balance: row.try_get("balance")?,
                })
            })
            .collect()
    }

    async fn reserve_total(
        &self,
        symbol: &str,
        platform: Platform,
        protocol: Protocol,
    ) -> Result<BigDecimal> {
        let total = sqlx::query_scalar(
            "SELECT COALESCE(SUM(value), 0) FROM reserves WHERE symbol = $1 AND platform = $2 AND protocol = $3",
        )
        .bind(symbol)
        .bind(platform.as_str())
        .bind(protocol.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    async fn reserves(&self, key: &ReserveKey) -> Result<Vec<Reserve>> {
        let rows = sqlx::query(&format!("SELECT * FROM reserves WHERE {} ORDER BY id", RESERVE_KEY))
            .bind(key.user_id)
            .bind(&key.symbol)
            .bind(key.platform.as_str())
            .bind(key.protocol.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(reserve_from_row).collect()
    }

    async fn lock_reserve(&self, key: &ReserveKey) -> Result<LockOutcome> {
        let mut tx = self.pool.begin().await?;

        let locks: Vec<bool> =
            sqlx::query_scalar(&format!("SELECT lock FROM reserves WHERE {} FOR UPDATE", RESERVE_KEY))
                .bind(key.user_id)
                .bind(&key.symbol)
                .bind(key.platform.as_str())
                .bind(key.protocol.as_str())
                .fetch_all(&mut *tx)
                .await?;

        let outcome = if locks.is_empty() {
            LockOutcome::Vacant
        } else if locks.iter().any(|locked| *locked) {
            LockOutcome::Busy
        } else {
            let result = sqlx::query(&format!("UPDATE reserves SET lock = TRUE WHERE {}", RESERVE_KEY))
                .bind(key.user_id)
                .bind(&key.symbol)
                .bind(key.platform.as_str())
                .bind(key.protocol.as_str())
                .execute(&mut *tx)
                .await?;
            LockOutcome::Acquired(result.rows_affected())
        };

        tx.commit().await?;
        debug!(key = %key, ?outcome, "Reserve lock");
        Ok(outcome)
    }

    async fn unlock_reserve(&self, key: &ReserveKey) -> Result<u64> {
        let result = sqlx::query(&format!("UPDATE reserves SET lock = FALSE WHERE {}", RESERVE_KEY))
            .bind(key.user_id)
            .bind(&key.symbol)
            .bind(key.platform.as_str())
            .bind(key.protocol.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM orders WHERE TRUE");

        if let Some(user_id) = filter.user_id {
            qb.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(base_unit) = &filter.base_unit {
            qb.push(" AND base_unit = ").push_bind(base_unit.clone());
        }
        if let Some(quote_unit) = &filter.quote_unit {
            qb.push(" AND quote_unit = ").push_bind(quote_unit.clone());
        }
        if let Some(assigning) = filter.assigning {
            qb.push(" AND assigning = ").push_bind(assigning.as_str());
        }
        if !filter.statuses.is_empty() {
            qb.push(" AND status IN (");
            let mut statuses = qb.separated(", ");
            for status in &filter.statuses {
                statuses.push_bind(status.as_str());
            }
            statuses.push_unseparated(")");
        }
        qb.push(" ORDER BY id DESC LIMIT ")
            .push_bind(i64::from(filter.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(filter.offset));

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn trade_by_match(&self, match_id: Uuid) -> Result<Option<Trade>> {
        let row = sqlx::query("SELECT * FROM trades WHERE match_id = $1")
            .bind(match_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(trade_from_row).transpose()
    }

    async fn trades_since(
        &self,
        base_unit: &str,
        quote_unit: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            "SELECT * FROM trades WHERE base_unit = $1 AND quote_unit = $2 AND created_at >= $3 ORDER BY id",
        )
        .bind(base_unit)
        .bind(quote_unit)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(trade_from_row).collect()
    }

    async fn transfers(&self, trade_id: TradeId) -> Result<Vec<Transfer>> {
        let rows = sqlx::query("SELECT * FROM transfers WHERE trade_id = $1 ORDER BY id")
            .bind(trade_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(transfer_from_row).collect()
    }

    async fn transaction(&self, hash: &str) -> Result<Option<Transaction>> {
        let row = sqlx::query("SELECT * FROM transactions WHERE hash = $1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn children(&self, parent_id: TransactionId) -> Result<Vec<Transaction>> {
        let rows = sqlx::query("SELECT * FROM transactions WHERE parent = $1 ORDER BY id")
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn currency(&self, symbol: &str) -> Result<Option<Currency>> {
        let row = sqlx::query("SELECT * FROM currencies WHERE symbol = $1")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(currency_from_row).transpose()
    }

    async fn chain(&self, id: ChainId) -> Result<Option<Chain>> {
        let row = sqlx::query("SELECT * FROM chains WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(chain_from_row).transpose()
    }

    async fn pair(&self, base_unit: &str, quote_unit: &str) -> Result<Option<Pair>> {
        let row = sqlx::query("SELECT * FROM pairs WHERE base_unit = $1 AND quote_unit = $2")
            .bind(base_unit)
            .bind(quote_unit)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(pair_from_row).transpose()
    }
}

/// Transaction over a pooled PostgreSQL connection
///
/// Dropping it without `commit` rolls the database transaction back.
pub struct PostgresLedgerTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PostgresLedgerTx {
    async fn ensure_asset(&mut self, user_id: UserId, symbol: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO assets (user_id, symbol) VALUES ($1, $2) ON CONFLICT (user_id, symbol) DO NOTHING",
        )
        .bind(user_id)
        .bind(symbol)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn balance(&mut self, user_id: UserId, symbol: &str) -> Result<Option<BigDecimal>> {
        let balance = sqlx::query_scalar("SELECT balance FROM assets WHERE user_id = $1 AND symbol = $2")
            .bind(user_id)
            .bind(symbol)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(balance)
    }

    async fn credit_balance(
        &mut self,
        user_id: UserId,
        symbol: &str,
        amount: &BigDecimal,
    ) -> Result<Option<BigDecimal>> {
        let balance = sqlx::query_scalar(
            "UPDATE assets SET balance = balance + $3 WHERE user_id = $1 AND symbol = $2 RETURNING balance",
        )
        .bind(user_id)
        .bind(symbol)
        .bind(amount)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(balance)
    }

    async fn debit_balance(
        &mut self,
        user_id: UserId,
        symbol: &str,
        amount: &BigDecimal,
    ) -> Result<DebitOutcome> {
        let applied: Option<BigDecimal> = sqlx::query_scalar(
            r#"
            UPDATE assets SET balance = balance - $3
            WHERE user_id = $1 AND symbol = $2 AND balance >= $3
            RETURNING balance
            "#,
        )
        .bind(user_id)
        .bind(symbol)
        .bind(amount)
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(balance) = applied {
            return Ok(DebitOutcome::Applied(balance));
        }
        Ok(match self.balance(user_id, symbol).await? {
            Some(balance) => DebitOutcome::Insufficient(balance),
            None => DebitOutcome::Missing,
        })
    }

    async fn adjust_reserve(
        &mut self,
        key: &ReserveKey,
        address: &str,
        delta: &BigDecimal,
    ) -> Result<ReserveOutcome> {
        let value: Option<BigDecimal> = if delta.is_negative() {
            sqlx::query_scalar(
                r#"
                UPDATE reserves SET value = value + $6
                WHERE user_id = $1 AND symbol = $2 AND platform = $3 AND protocol = $4
                  AND address = $5 AND value + $6 >= 0
                RETURNING value
                "#,
            )
            .bind(key.user_id)
            .bind(&key.symbol)
            .bind(key.platform.as_str())
            .bind(key.protocol.as_str())
            .bind(address)
            .bind(delta)
            .fetch_optional(&mut *self.tx)
            .await?
        } else {
            sqlx::query_scalar(
                r#"
                INSERT INTO reserves (user_id, symbol, platform, protocol, address, value)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (user_id, symbol, platform, protocol, address)
                DO UPDATE SET value = reserves.value + EXCLUDED.value
                RETURNING value
                "#,
            )
            .bind(key.user_id)
            .bind(&key.symbol)
            .bind(key.platform.as_str())
            .bind(key.protocol.as_str())
            .bind(address)
            .bind(delta)
            .fetch_optional(&mut *self.tx)
            .await?
        };

        Ok(value.map_or(ReserveOutcome::Insufficient, ReserveOutcome::Applied))
    }

    async fn insert_order(&mut self, order: &Order) -> Result<OrderId> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO orders (
                user_id, base_unit, quote_unit, assigning, order_type, price, quantity,
                value, status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(order.user_id)
        .bind(&order.base_unit)
        .bind(&order.quote_unit)
        .bind(order.assigning.as_str())
        .bind(order.order_type.as_str())
        .bind(&order.price)
        .bind(&order.quantity)
        .bind(&order.value)
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn order_for_update(&mut self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn update_order(&mut self, order: &Order) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET price = $2, quantity = $3, value = $4, status = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(&order.price)
        .bind(&order.quantity)
        .bind(&order.value)
        .bind(order.status.as_str())
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("order {}", order.id)));
        }
        Ok(())
    }

    async fn insert_trade(&mut self, trade: &Trade) -> Result<Option<TradeId>> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO trades (
                match_id, maker_order_id, taker_order_id, assigning, user_id, base_unit,
                quote_unit, quantity, price, fees, maker, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (match_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(trade.match_id)
        .bind(trade.maker_order_id)
        .bind(trade.taker_order_id)
        .bind(trade.assigning.as_str())
        .bind(trade.user_id)
        .bind(&trade.base_unit)
        .bind(&trade.quote_unit)
        .bind(&trade.quantity)
        .bind(&trade.price)
        .bind(&trade.fees)
        .bind(trade.maker)
        .bind(trade.created_at)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn insert_transfer(&mut self, transfer: &Transfer) -> Result<i64> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO transfers (
                trade_id, order_id, assigning, user_id, base_unit, quote_unit, price,
                quantity, fees, maker, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(transfer.trade_id)
        .bind(transfer.order_id)
        .bind(transfer.assigning.as_str())
        .bind(transfer.user_id)
        .bind(&transfer.base_unit)
        .bind(&transfer.quote_unit)
        .bind(&transfer.price)
        .bind(&transfer.quantity)
        .bind(&transfer.fees)
        .bind(transfer.maker)
        .bind(transfer.created_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn accrue_fee(&mut self, symbol: &str, amount: &BigDecimal) -> Result<bool> {
        let result = sqlx::query("UPDATE currencies SET fees_charges = fees_charges + $2 WHERE symbol = $1")
            .bind(symbol)
            .bind(amount)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_transaction(
        &mut self,
        transaction: &Transaction,
    ) -> Result<Option<Transaction>> {
        let row = sqlx::query(
            r#"
            INSERT INTO transactions (
                hash, symbol, value, fees, confirmation, to_address, block, chain_id, user_id,
                assignment, tx_type, platform, protocol, allocation, parent, status, chain,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (hash) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&transaction.hash)
        .bind(&transaction.symbol)
        .bind(&transaction.value)
        .bind(&transaction.fees)
        .bind(transaction.confirmation)
        .bind(&transaction.to)
        .bind(transaction.block)
        .bind(transaction.chain_id)
        .bind(transaction.user_id)
        .bind(transaction.assignment.as_str())
        .bind(transaction.tx_type.as_str())
        .bind(transaction.platform.as_str())
        .bind(transaction.protocol.as_str())
        .bind(transaction.allocation.as_str())
        .bind(transaction.parent)
        .bind(transaction.status.as_str())
        .bind(transaction.chain.as_ref().map(Json))
        .bind(transaction.created_at)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn transaction_for_update(&mut self, hash: &str) -> Result<Option<Transaction>> {
        let row = sqlx::query("SELECT * FROM transactions WHERE hash = $1 FOR UPDATE")
            .bind(hash)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE transactions SET
                fees = $2, confirmation = $3, block = $4, assignment = $5,
                allocation = $6, parent = $7, status = $8
            WHERE id = $1
            "#,
        )
        .bind(transaction.id)
        .bind(&transaction.fees)
        .bind(transaction.confirmation)
        .bind(transaction.block)
        .bind(transaction.assignment.as_str())
        .bind(transaction.allocation.as_str())
        .bind(transaction.parent)
        .bind(transaction.status.as_str())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("transaction {}", transaction.id)));
        }
        Ok(())
    }

    async fn set_chain_block(&mut self, chain_id: ChainId, block: i64) -> Result<()> {
        sqlx::query("UPDATE chains SET block = GREATEST(block, $2) WHERE id = $1")
            .bind(chain_id)
            .bind(block)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| StorageError::Transaction(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StorageError::Transaction(e.to_string()))
    }
}

fn text<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: FromStr<Err = common::Error>,
{
    let value: String = row.try_get(column)?;
    Ok(value.parse()?)
}

fn scale(row: &PgRow, column: &str) -> Result<u32> {
    let value: i32 = row.try_get(column)?;
    u32::try_from(value).map_err(|e| StorageError::Serialization(format!("{}: {}", column, e)))
}

fn reserve_from_row(row: &PgRow) -> Result<Reserve> {
    Ok(Reserve {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        symbol: row.try_get("symbol")?,
        platform: text(row, "platform")?,
        protocol: text(row, "protocol")?,
        address: row.try_get("address")?,
        value: row.try_get("value")?,
        lock: row.try_get("lock")?,
    })
}

fn order_from_row(row: &PgRow) -> Result<Order> {
    Ok(Order {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        base_unit: row.try_get("base_unit")?,
        quote_unit: row.try_get("quote_unit")?,
        assigning: text(row, "assigning")?,
        order_type: text(row, "order_type")?,
        price: row.try_get("price")?,
        quantity: row.try_get("quantity")?,
        value: row.try_get("value")?,
        status: text(row, "status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn trade_from_row(row: &PgRow) -> Result<Trade> {
    Ok(Trade {
        id: row.try_get("id")?,
        match_id: row.try_get("match_id")?,
        maker_order_id: row.try_get("maker_order_id")?,
        taker_order_id: row.try_get("taker_order_id")?,
        assigning: text(row, "assigning")?,
        user_id: row.try_get("user_id")?,
        base_unit: row.try_get("base_unit")?,
        quote_unit: row.try_get("quote_unit")?,
        quantity: row.try_get("quantity")?,
        price: row.try_get("price")?,
        fees: row.try_get("fees")?,
        maker: row.try_get("maker")?,
        created_at: row.try_get("created_at")?,
    })
}

fn transfer_from_row(row: &PgRow) -> Result<Transfer> {
    Ok(Transfer {
        id: row.try_get("id")?,
        trade_id: row.try_get("trade_id")?,
        order_id: row.try_get("order_id")?,
        assigning: text(row, "assigning")?,
        user_id: row.try_get("user_id")?,
        base_unit: row.try_get("base_unit")?,
        quote_unit: row.try_get("quote_unit")?,
        price: row.try_get("price")?,
        quantity: row.try_get("quantity")?,
        fees: row.try_get("fees")?,
        maker: row.try_get("maker")?,
        created_at: row.try_get("created_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction> {
    let chain: Option<Json<ChainSnapshot>> = row.try_get("chain")?;
    Ok(Transaction {
        id: row.try_get("id")?,
        hash: row.try_get("hash")?,
        symbol: row.try_get("symbol")?,
        value: row.try_get("value")?,
        fees: row.try_get("fees")?,
        confirmation: row.try_get("confirmation")?,
        to: row.try_get("to_address")?,
        block: row.try_get("block")?,
        chain_id: row.try_get("chain_id")?,
        user_id: row.try_get("user_id")?,
        assignment: text(row, "assignment")?,
        tx_type: text(row, "tx_type")?,
        platform: text(row, "platform")?,
        protocol: text(row, "protocol")?,
        allocation: text(row, "allocation")?,
        parent: row.try_get("parent")?,
        status: text(row, "status")?,
        chain: chain.map(|c| c.0),
        created_at: row.try_get("created_at")?,
    })
}

fn currency_from_row(row: &PgRow) -> Result<Currency> {
    Ok(Currency {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        symbol: row.try_get("symbol")?,
        min_withdraw: row.try_get("min_withdraw")?,
        max_withdraw: row.try_get("max_withdraw")?,
        min_trade: row.try_get("min_trade")?,
        max_trade: row.try_get("max_trade")?,
        fees_trade: row.try_get("fees_trade")?,
        fees_discount: row.try_get("fees_discount")?,
        fees_charges: row.try_get("fees_charges")?,
        fees_costs: row.try_get("fees_costs")?,
        marker: row.try_get("marker")?,
        status: row.try_get("status")?,
        tx_type: text(row, "tx_type")?,
        chains: row.try_get("chains")?,
    })
}

fn chain_from_row(row: &PgRow) -> Result<Chain> {
    Ok(Chain {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        rpc: row.try_get("rpc")?,
        block: row.try_get("block")?,
        network: row.try_get("network")?,
        explorer_link: row.try_get("explorer_link")?,
        platform: text(row, "platform")?,
        confirmation: row.try_get("confirmation")?,
        time_withdraw: row.try_get("time_withdraw")?,
        fees: row.try_get("fees")?,
        tag: row.try_get("tag")?,
        parent_symbol: row.try_get("parent_symbol")?,
        decimals: scale(row, "decimals")?,
        status: row.try_get("status")?,
    })
}

fn pair_from_row(row: &PgRow) -> Result<Pair> {
    Ok(Pair {
        id: row.try_get("id")?,
        base_unit: row.try_get("base_unit")?,
        quote_unit: row.try_get("quote_unit")?,
        price: row.try_get("price")?,
        base_decimal: scale(row, "base_decimal")?,
        quote_decimal: scale(row, "quote_decimal")?,
        status: row.try_get("status")?,
    })
}
