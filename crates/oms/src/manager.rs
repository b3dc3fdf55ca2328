//! Order Manager - order lifecycle on top of the ledger store

use bigdecimal::{BigDecimal, Zero};
use chrono::Utc;
use std::sync::Arc;

use common::{Assigning, Direction, Order, OrderId, OrderStatus, OrderType};
use storage::{LedgerStore, LedgerTx, OrderFilter};
use wallet::{BalanceLedger, EnsureMode};

use crate::error::{OmsError, Result};

/// Largest page `list` will return
const MAX_PAGE: u32 = 500;

/// Order Manager - persists orders and moves their status
///
/// Intake and cancel hold or refund the order's balance in the same
/// transaction as the order write, so an order row never exists without
/// its hold.
#[derive(Clone)]
pub struct OrderManager {
    store: Arc<dyn LedgerStore>,
    balances: BalanceLedger,
}

impl OrderManager {
    pub fn new(store: Arc<dyn LedgerStore>, balances: BalanceLedger) -> Self {
        Self { store, balances }
    }

    /// Insert an order as given, without validation or hold
    pub async fn insert(&self, order: &Order) -> Result<OrderId> {
        let mut tx = self.store.begin().await?;
        let id = tx.insert_order(order).await?;
        tx.commit().await?;

        tracing::debug!(order_id = id, user_id = order.user_id, "Order inserted");
        Ok(id)
    }

    /// Get an order by id
    pub async fn get(&self, id: OrderId) -> Result<Order> {
        self.store.order(id).await?.ok_or(OmsError::NotFound(id))
    }

    /// List orders, newest first
    pub async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        let mut filter = filter.clone();
        filter.limit = filter.limit.clamp(1, MAX_PAGE);
        Ok(self.store.list_orders(&filter).await?)
    }

    /// Move a pending order to a terminal status
    pub async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<Order> {
        if !status.is_terminal() {
            return Err(OmsError::InvalidState(format!(
                "cannot move order {} back to {}",
                id, status
            )));
        }

        let mut tx = self.store.begin().await?;
        let mut order = Self::pending_for_update(tx.as_mut(), id).await?;
        order.status = status;
        order.updated_at = Utc::now();
        tx.update_order(&order).await?;
        tx.commit().await?;

        tracing::info!(order_id = id, %status, "Order status updated");
        Ok(order)
    }

    /// Fill `quantity` of a pending order inside a caller's transaction
    ///
    /// The remaining value is decremented; at zero the order becomes FILLED.
    pub async fn fill_in(
        &self,
        tx: &mut dyn LedgerTx,
        id: OrderId,
        quantity: &BigDecimal,
    ) -> Result<Order> {
        let mut order = Self::pending_for_update(tx, id).await?;
        if quantity > &order.value {
            return Err(OmsError::InvalidState(format!(
                "fill {} exceeds remaining {} of order {}",
                quantity, order.value, id
            )));
        }

        order.value = &order.value - quantity;
        if order.value.is_zero() {
            order.status = OrderStatus::Filled;
        }
        order.updated_at = Utc::now();
        tx.update_order(&order).await?;

        tracing::debug!(order_id = id, remaining = %order.value, status = %order.status, "Order filled");
        Ok(order)
    }

    /// Validate, hold and insert a new order
    ///
    /// BUY orders hold `quantity × price` of the quote unit; SELL orders
    /// hold `quantity` of the base unit. A MARKET order is priced at the
    /// best resting counter-order first.
    pub async fn submit(&self, mut order: Order) -> Result<Order> {
        if order.order_type == OrderType::Market {
            order.price = self.market_price(&order).await?;
        }
        self.validate(&order).await?;

        order.status = OrderStatus::Pending;
        order.value = order.quantity.clone();
        let now = Utc::now();
        order.created_at = now;
        order.updated_at = now;

        let mut tx = self.store.begin().await?;
        for symbol in [&order.base_unit, &order.quote_unit] {
            self.balances
                .ensure_asset_in(tx.as_mut(), order.user_id, symbol, EnsureMode::Lazy)
                .await?;
        }
        let (symbol, hold) = order.hold(&order.quantity);
        self.balances
            .adjust_in(tx.as_mut(), order.user_id, symbol, &hold, Direction::Debit)
            .await?;
        order.id = tx.insert_order(&order).await?;
        tx.commit().await?;
        self.balances.committed(Direction::Debit, 1);

        tracing::info!(
            order_id = order.id,
            user_id = order.user_id,
            pair = %order.pair(),
            assigning = %order.assigning,
            price = %order.price,
            quantity = %order.quantity,
            "Order submitted"
        );
        Ok(order)
    }

    /// Cancel a pending order and refund its remaining hold
    pub async fn cancel(&self, id: OrderId) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let mut order = Self::pending_for_update(tx.as_mut(), id).await?;

        let (symbol, refund) = order.hold(&order.value);
        if refund > BigDecimal::zero() {
            self.balances
                .adjust_in(tx.as_mut(), order.user_id, symbol, &refund, Direction::Credit)
                .await?;
        }

        order.status = OrderStatus::Cancelled;
        order.updated_at = Utc::now();
        tx.update_order(&order).await?;
        tx.commit().await?;
        if refund > BigDecimal::zero() {
            self.balances.committed(Direction::Credit, 1);
        }

        tracing::info!(order_id = id, %refund, "Order cancelled");
        Ok(order)
    }

    /// Remaining value of the pending orders on one side of a pair
    pub async fn volume(
        &self,
        base_unit: &str,
        quote_unit: &str,
        assigning: Assigning,
    ) -> Result<BigDecimal> {
        let pending = self.pending(base_unit, quote_unit, assigning).await?;
        Ok(pending
            .iter()
            .fold(BigDecimal::zero(), |total, order| total + &order.value))
    }

    /// Best resting price a MARKET order of `assigning` would cross
    ///
    /// BUY takes the lowest pending SELL and SELL the highest pending BUY.
    /// Without a counter-order the pair's reference price is used.
    pub async fn best_price(
        &self,
        base_unit: &str,
        quote_unit: &str,
        assigning: Assigning,
    ) -> Result<Option<BigDecimal>> {
        let counter = match assigning {
            Assigning::Buy => Assigning::Sell,
            Assigning::Sell => Assigning::Buy,
        };
        let prices = self
            .pending(base_unit, quote_unit, counter)
            .await?
            .into_iter()
            .map(|order| order.price);
        let best = match assigning {
            Assigning::Buy => prices.min(),
            Assigning::Sell => prices.max(),
        };
        if best.is_some() {
            return Ok(best);
        }

        let reference = self
            .store
            .pair(base_unit, quote_unit)
            .await?
            .map(|pair| pair.price)
            .filter(|price| price > &BigDecimal::zero());
        Ok(reference)
    }

    /// Resolve a MARKET order's price; a positive given price is the worst it accepts
    async fn market_price(&self, order: &Order) -> Result<BigDecimal> {
        let best = self
            .best_price(&order.base_unit, &order.quote_unit, order.assigning)
            .await?
            .ok_or_else(|| {
                OmsError::InvalidOrder(format!("no market price for {}", order.pair()))
            })?;

        if order.price > BigDecimal::zero() {
            let beyond = match order.assigning {
                Assigning::Buy => best > order.price,
                Assigning::Sell => best < order.price,
            };
            if beyond {
                return Err(OmsError::InvalidOrder(format!(
                    "market price {} is beyond the {} limit {}",
                    best, order.assigning, order.price
                )));
            }
        }
        tracing::debug!(pair = %order.pair(), assigning = %order.assigning, price = %best, "Market order priced");
        Ok(best)
    }

    async fn pending(
        &self,
        base_unit: &str,
        quote_unit: &str,
        assigning: Assigning,
    ) -> Result<Vec<Order>> {
        let mut filter = OrderFilter::default()
            .pair(base_unit, quote_unit)
            .side(assigning)
            .status(OrderStatus::Pending);
        filter.limit = MAX_PAGE;

        let mut orders = Vec::new();
        loop {
            let page = self.store.list_orders(&filter).await?;
            let full = page.len() == MAX_PAGE as usize;
            orders.extend(page);
            if !full {
                return Ok(orders);
            }
            filter.offset += MAX_PAGE;
        }
    }

    async fn validate(&self, order: &Order) -> Result<()> {
        let zero = BigDecimal::zero();
        if order.price <= zero {
            return Err(OmsError::InvalidOrder("price must be positive".to_string()));
        }
        if order.quantity <= zero {
            return Err(OmsError::InvalidOrder("quantity must be positive".to_string()));
        }
        if order.base_unit == order.quote_unit {
            return Err(OmsError::InvalidOrder(format!(
                "base and quote unit are both {}",
                order.base_unit
            )));
        }

        let pair = self
            .store
            .pair(&order.base_unit, &order.quote_unit)
            .await?
            .ok_or_else(|| OmsError::ReferenceNotFound(format!("pair {}", order.pair())))?;

        let base = self
            .store
            .currency(&order.base_unit)
            .await?
            .ok_or_else(|| OmsError::ReferenceNotFound(format!("currency {}", order.base_unit)))?;
        let quote = self
            .store
            .currency(&order.quote_unit)
            .await?
            .ok_or_else(|| OmsError::ReferenceNotFound(format!("currency {}", order.quote_unit)))?;

        if !(pair.status && base.status && quote.status) {
            return Err(OmsError::NotTradable(order.pair()));
        }
        if !base.accepts_trade(&order.quantity) {
            let (min, max) = base.trade_range();
            return Err(OmsError::InvalidOrder(format!(
                "quantity {} outside {}..={}",
                order.quantity,
                min,
                max.map_or_else(|| "unbounded".to_string(), |m| m.to_string())
            )));
        }
        Ok(())
    }

    async fn pending_for_update(tx: &mut dyn LedgerTx, id: OrderId) -> Result<Order> {
        let order = tx.order_for_update(id).await?.ok_or(OmsError::NotFound(id))?;
        if !order.is_open() {
            return Err(OmsError::InvalidState(format!(
                "order {} is {}",
                id, order.status
            )));
        }
        Ok(order)
    }
}
