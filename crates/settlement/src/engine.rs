//! Trade settlement engine
//!
//! Turns a matched maker/taker pair into one trade row, two transfer rows,
//! the balance credits of both legs, fee accruals and the order fills. All
//! of it is written in one [`LedgerTx`](storage::LedgerTx): either the whole
//! match commits or nothing does. Notifications and candle refreshes run
//! after the commit and can only produce warnings.

use bigdecimal::{BigDecimal, Signed, Zero};
use chrono::Utc;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::{Assigning, Direction, OrderId, Pair, Trade, Transfer, UserId};
use market_data::{latest_candles, price_change, total_volume, Candle, CandleInterval};
use observability::LedgerMetrics;
use oms::OrderManager;
use storage::LedgerStore;
use wallet::{BalanceLedger, EnsureMode};

use crate::error::{SettlementError, SettlementWarning};
use crate::fees::FeeCalculator;
use crate::notifier::{candles_channel, Notifier, ORDER_STATUS_CHANNEL};
use crate::types::{Match, MatchedOrder, SettlementOutcome, SettlementReport};
use crate::Result;

#[derive(Debug, Clone)]
pub struct SettlementOptions {
    pub operation_timeout: Duration,
    pub candle_resolutions: Vec<CandleInterval>,
    /// Candles published per resolution
    pub candle_limit: usize,
    pub exchange_topic: String,
    pub notifications_enabled: bool,
}

impl Default for SettlementOptions {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_millis(config::default_operation_timeout_ms()),
            candle_resolutions: CandleInterval::ALL.to_vec(),
            candle_limit: config::default_candle_limit(),
            exchange_topic: config::default_exchange_topic(),
            notifications_enabled: true,
        }
    }
}

impl SettlementOptions {
    pub fn from_config(settlement: &config::SettlementConfig) -> Result<Self> {
        let candle_resolutions = settlement
            .candle_resolutions
            .iter()
            .map(|r| CandleInterval::from_str(r).map_err(|e| SettlementError::Config(e.to_string())))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            operation_timeout: settlement.operation_timeout(),
            candle_resolutions,
            candle_limit: settlement.candle_limit.max(1),
            exchange_topic: settlement.exchange_topic.clone(),
            notifications_enabled: settlement.notifications_enabled,
        })
    }
}

/// What one leg writes, computed before the transaction opens
#[derive(Debug, Clone, PartialEq)]
struct LegPlan {
    order_id: OrderId,
    user_id: UserId,
    assigning: Assigning,
    maker: bool,
    quantity: BigDecimal,
    price: BigDecimal,
    /// Asset credited to the user
    received: String,
    net: BigDecimal,
    fee: BigDecimal,
    fee_symbol: String,
    /// Quote returned to a BUY leg filled below its limit
    refund: BigDecimal,
}

#[derive(Serialize)]
struct CandleUpdate<'a> {
    base_unit: &'a str,
    quote_unit: &'a str,
    resolution: CandleInterval,
    /// Percent change between the two newest closes
    ratio: BigDecimal,
    volume: BigDecimal,
    candles: Vec<Candle>,
}

#[derive(Clone)]
pub struct SettlementEngine {
    store: Arc<dyn LedgerStore>,
    balances: BalanceLedger,
    orders: OrderManager,
    fees: FeeCalculator,
    notifier: Arc<dyn Notifier>,
    options: Arc<SettlementOptions>,
    metrics: LedgerMetrics,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        notifier: Arc<dyn Notifier>,
        options: SettlementOptions,
    ) -> Self {
        let balances = BalanceLedger::new(store.clone());
        Self {
            orders: OrderManager::new(store.clone(), balances.clone()),
            fees: FeeCalculator::new(store.clone()),
            balances,
            store,
            notifier,
            options: Arc::new(options),
            metrics: LedgerMetrics::new(),
        }
    }

    pub fn options(&self) -> &SettlementOptions {
        &self.options
    }

    /// Settle a match, then publish order status and refresh candles
    pub async fn settle(&self, request: &Match) -> Result<SettlementReport> {
        let mut timer = self.metrics.settlement_timer();
        let limit = self.options.operation_timeout;
        let outcome = tokio::time::timeout(limit, self.settle_ledger(request))
            .await
            .map_err(|_| SettlementError::Timeout(limit))??;

        let mut warnings = Vec::new();
        match &outcome {
            SettlementOutcome::Settled { .. } => {
                timer.set_outcome("settled");
                warnings = self.publish_order_status(request).await;

                let engine = self.clone();
                let base_unit = request.base_unit().to_string();
                let quote_unit = request.quote_unit().to_string();
                tokio::spawn(async move {
                    let warnings = engine.refresh_candles(&base_unit, &quote_unit).await;
                    if !warnings.is_empty() {
                        debug!(count = warnings.len(), "Candle refresh finished with warnings");
                    }
                });
            }
            SettlementOutcome::Skipped => timer.set_outcome("skipped"),
            SettlementOutcome::Duplicate => timer.set_outcome("duplicate"),
        }

        Ok(SettlementReport {
            match_id: request.match_id,
            outcome,
            warnings,
        })
    }

    /// Trade and transfers recorded for a match id
    pub async fn trade(&self, match_id: Uuid) -> Result<Option<(Trade, Vec<Transfer>)>> {
        let Some(trade) = self.store.trade_by_match(match_id).await? else {
            return Ok(None);
        };
        let transfers = self.store.transfers(trade.id).await?;
        Ok(Some((trade, transfers)))
    }

    async fn settle_ledger(&self, request: &Match) -> Result<SettlementOutcome> {
        if request.value().is_zero() {
            debug!(match_id = %request.match_id, "Zero traded value, nothing to settle");
            return Ok(SettlementOutcome::Skipped);
        }
        validate(request)?;

        if self.store.trade_by_match(request.match_id).await?.is_some() {
            info!(match_id = %request.match_id, "Match already settled");
            return Ok(SettlementOutcome::Duplicate);
        }

        // Reference reads happen before the transaction opens.
        let pair = self
            .store
            .pair(request.base_unit(), request.quote_unit())
            .await?
            .ok_or_else(|| {
                SettlementError::NotFound(format!(
                    "pair {}/{}",
                    request.base_unit(),
                    request.quote_unit()
                ))
            })?;
        let maker_price = request
            .legs
            .iter()
            .find(|leg| leg.params.maker)
            .map(|leg| leg.order.price.clone());
        let quantity = traded_quantity(request)?;

        let mut plans = Vec::with_capacity(2);
        for leg in &request.legs {
            let rate = self.fees.rate(&leg.order.quote_unit, leg.params.maker).await?;
            plans.push(plan_leg(leg, &quantity, maker_price.as_ref(), &pair, &rate)?);
        }

        let now = Utc::now();
        let maker = request.maker();
        let trade = Trade {
            id: 0,
            match_id: request.match_id,
            maker_order_id: maker.order.id,
            taker_order_id: request.taker().order.id,
            assigning: maker.order.assigning,
            user_id: maker.order.user_id,
            base_unit: request.base_unit().to_string(),
            quote_unit: request.quote_unit().to_string(),
            quantity: plans[0].quantity.clone(),
            price: plans[0].price.clone(),
            fees: plans[0].fee.clone(),
            maker: maker.params.maker,
            created_at: now,
        };

        let mut tx = self.store.begin().await?;
        let Some(trade_id) = tx.insert_trade(&trade).await? else {
            tx.rollback().await?;
            info!(match_id = %request.match_id, "Match settled concurrently");
            return Ok(SettlementOutcome::Duplicate);
        };

        let mut transfers = Vec::with_capacity(plans.len());
        let mut credits = 0;
        for plan in &plans {
            self.balances
                .ensure_asset_in(tx.as_mut(), plan.user_id, &plan.received, EnsureMode::Lazy)
                .await?;
            self.balances
                .adjust_in(tx.as_mut(), plan.user_id, &plan.received, &plan.net, Direction::Credit)
                .await?;
            credits += 1;
            if plan.refund.is_positive() {
                self.balances
                    .adjust_in(
                        tx.as_mut(),
                        plan.user_id,
                        request.quote_unit(),
                        &plan.refund,
                        Direction::Credit,
                    )
                    .await?;
                credits += 1;
            }

            let transfer = Transfer {
                id: 0,
                trade_id,
                order_id: plan.order_id,
                assigning: plan.assigning,
                user_id: plan.user_id,
                base_unit: request.base_unit().to_string(),
                quote_unit: request.quote_unit().to_string(),
                price: plan.price.clone(),
                quantity: plan.quantity.clone(),
                fees: plan.fee.clone(),
                maker: plan.maker,
                created_at: now,
            };
            transfers.push(tx.insert_transfer(&transfer).await?);

            if plan.fee.is_positive() && !tx.accrue_fee(&plan.fee_symbol, &plan.fee).await? {
                return Err(SettlementError::NotFound(format!(
                    "fee currency {}",
                    plan.fee_symbol
                )));
            }

            self.orders.fill_in(tx.as_mut(), plan.order_id, &plan.quantity).await?;
        }
        tx.commit().await?;
        self.balances.committed(Direction::Credit, credits);

        info!(
            match_id = %request.match_id,
            trade_id,
            pair = %format!("{}/{}", request.base_unit(), request.quote_unit()),
            price = %trade.price,
            quantity = %trade.quantity,
            "Trade settled"
        );
        Ok(SettlementOutcome::Settled { trade_id, transfers })
    }

    async fn publish_order_status(&self, request: &Match) -> Vec<SettlementWarning> {
        if !self.options.notifications_enabled {
            return Vec::new();
        }

        let mut warnings = Vec::new();
        for leg in &request.legs {
            let payload = match self.store.order(leg.order.id).await {
                Ok(Some(order)) => serde_json::to_value(&order).map_err(|e| e.to_string()),
                Ok(None) => Err(format!("order {} not found after settlement", leg.order.id)),
                Err(e) => Err(e.to_string()),
            };
            let warning = match payload {
                Ok(payload) => self.publish(ORDER_STATUS_CHANNEL, &payload).await,
                Err(message) => Some(self.publish_failed(ORDER_STATUS_CHANNEL, message)),
            };
            warnings.extend(warning);
        }
        warnings
    }

    /// Recompute the newest candles of a pair and publish one message per resolution
    pub async fn refresh_candles(&self, base_unit: &str, quote_unit: &str) -> Vec<SettlementWarning> {
        if !self.options.notifications_enabled {
            return Vec::new();
        }

        let now = Utc::now();
        let limit = self.options.candle_limit;
        let mut warnings = Vec::new();
        for interval in &self.options.candle_resolutions {
            let channel = candles_channel(interval.as_str());
            let since = interval.lookback(now, limit);
            let trades = match self.store.trades_since(base_unit, quote_unit, since).await {
                Ok(trades) => trades,
                Err(e) => {
                    warn!(base_unit, quote_unit, %interval, error = %e, "Candle query failed");
                    continue;
                }
            };

            let candles = latest_candles(&trades, *interval, limit);
            let update = CandleUpdate {
                base_unit,
                quote_unit,
                resolution: *interval,
                ratio: price_change(&candles),
                volume: total_volume(&candles),
                candles,
            };
            let warning = match serde_json::to_value(&update) {
                Ok(payload) => self.publish(&channel, &payload).await,
                Err(e) => Some(self.publish_failed(&channel, e.to_string())),
            };
            warnings.extend(warning);
        }
        warnings
    }

    async fn publish(&self, channel: &str, payload: &serde_json::Value) -> Option<SettlementWarning> {
        let topic = &self.options.exchange_topic;
        match self.notifier.publish(topic, &[channel], payload).await {
            Ok(()) => None,
            Err(e) => Some(self.publish_failed(channel, e.to_string())),
        }
    }

    fn publish_failed(&self, channel: &str, message: String) -> SettlementWarning {
        let topic = &self.options.exchange_topic;
        warn!(topic = %topic, channel, error = %message, "Publish failed");
        self.metrics.record_publish_failure(topic);
        SettlementWarning::PublishFailed {
            topic: topic.clone(),
            channel: channel.to_string(),
            message,
        }
    }
}

fn validate(request: &Match) -> Result<()> {
    let [maker, taker] = &request.legs;
    if maker.order.base_unit != taker.order.base_unit
        || maker.order.quote_unit != taker.order.quote_unit
    {
        return Err(SettlementError::InvalidMatch(format!(
            "legs trade different pairs: {} and {}",
            maker.order.pair(),
            taker.order.pair()
        )));
    }
    if maker.order.assigning == taker.order.assigning {
        return Err(SettlementError::InvalidMatch(format!(
            "both legs are {}",
            maker.order.assigning
        )));
    }
    for leg in &request.legs {
        if leg.order.id <= 0 {
            return Err(SettlementError::InvalidMatch(
                "order has not been stored".to_string(),
            ));
        }
        if !leg.value.is_positive() {
            return Err(SettlementError::InvalidMatch(format!(
                "order {} traded value {} is not positive",
                leg.order.id, leg.value
            )));
        }
    }
    Ok(())
}

/// The one base quantity both legs settle
///
/// A leg flagged `equal` trades its counterparty's value, any other leg its
/// own. Legs that resolve to different quantities would pay one side for
/// more base than the other gives up, so the match is rejected.
fn traded_quantity(request: &Match) -> Result<BigDecimal> {
    let resolve = |leg: &MatchedOrder, counterparty: &MatchedOrder| {
        if leg.params.equal {
            counterparty.value.clone()
        } else {
            leg.value.clone()
        }
    };
    let [maker, taker] = &request.legs;
    let quantity = resolve(maker, taker);
    let other = resolve(taker, maker);
    if quantity != other {
        return Err(SettlementError::InvalidMatch(format!(
            "legs settle different quantities: {} and {}",
            quantity, other
        )));
    }
    Ok(quantity)
}

fn plan_leg(
    leg: &MatchedOrder,
    quantity: &BigDecimal,
    maker_price: Option<&BigDecimal>,
    pair: &Pair,
    rate: &BigDecimal,
) -> Result<LegPlan> {
    let order = &leg.order;
    let quantity = quantity.clone();
    let price = maker_price.cloned().unwrap_or_else(|| order.price.clone());

    let beyond_limit = match order.assigning {
        Assigning::Buy => price > order.price,
        Assigning::Sell => price < order.price,
    };
    if beyond_limit {
        return Err(SettlementError::InvalidMatch(format!(
            "order {} {} limit {} does not cross price {}",
            order.id, order.assigning, order.price, price
        )));
    }

    let (received, gross) = match order.assigning {
        Assigning::Buy => (&order.base_unit, quantity.clone()),
        Assigning::Sell => (&order.quote_unit, &quantity * &price),
    };
    let fee_symbol = if leg.params.turn {
        &order.base_unit
    } else {
        &order.quote_unit
    };
    if fee_symbol != received {
        return Err(SettlementError::InvalidMatch(format!(
            "order {} receives {} but is charged fees in {}",
            order.id, received, fee_symbol
        )));
    }

    let scale = pair.scale_of(received).ok_or_else(|| {
        SettlementError::NotFound(format!(
            "{} in pair {}/{}",
            received, pair.base_unit, pair.quote_unit
        ))
    })?;
    let (net, fee) = FeeCalculator::gross_to_net(&gross, rate, scale);

    let refund = match order.assigning {
        Assigning::Buy if price < order.price => &quantity * (&order.price - &price),
        _ => BigDecimal::zero(),
    };

    Ok(LegPlan {
        order_id: order.id,
        user_id: order.user_id,
        assigning: order.assigning,
        maker: leg.params.maker,
        quantity,
        price,
        received: received.clone(),
        net,
        fee,
        fee_symbol: fee_symbol.clone(),
        refund,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use common::{Order, OrderType};

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn pair() -> Pair {
        Pair {
            id: 1,
            base_unit: "btc".to_string(),
            quote_unit: "usdt".to_string(),
            price: BigDecimal::zero(),
            base_decimal: 8,
            quote_decimal: 2,
            status: true,
        }
    }

    fn leg(id: OrderId, assigning: Assigning, price: &str, value: &str) -> MatchedOrder {
        let mut order = Order::new(id, "btc", "usdt", assigning, OrderType::Limit, dec(price), dec(value));
        order.id = id;
        MatchedOrder::new(order, dec(value))
    }

    fn sample(taker_price: &str) -> Match {
        Match::new(
            Uuid::new_v4(),
            leg(1, Assigning::Sell, "100", "2"),
            leg(2, Assigning::Buy, taker_price, "2").equal(),
        )
    }

    #[test]
    fn test_maker_price_wins_and_buyer_is_refunded() {
        let m = sample("105");
        let maker_price = Some(&m.legs[0].order.price);
        let quantity = traded_quantity(&m).unwrap();

        let taker = plan_leg(&m.legs[1], &quantity, maker_price, &pair(), &dec("0.2")).unwrap();
        assert_eq!(taker.price, dec("100"));
        assert_eq!(taker.received, "btc");
        assert_eq!(taker.fee, dec("0.004"));
        assert_eq!(taker.net, dec("1.996"));
        assert_eq!(taker.refund, dec("10"));

        let maker = plan_leg(&m.legs[0], &quantity, maker_price, &pair(), &dec("0.1")).unwrap();
        assert_eq!(maker.received, "usdt");
        assert_eq!(maker.fee, dec("0.20"));
        assert_eq!(maker.net, dec("199.80"));
        assert!(maker.refund.is_zero());
    }

    #[test]
    fn test_both_legs_trade_one_quantity() {
        let mut m = sample("100");
        m.legs[1].value = dec("0.5");
        assert_eq!(traded_quantity(&m).unwrap(), dec("2"));

        m.legs[1].params.equal = false;
        assert_matches!(traded_quantity(&m), Err(SettlementError::InvalidMatch(_)));

        m.legs[0].params.equal = true;
        assert_eq!(traded_quantity(&m).unwrap(), dec("0.5"));

        m.legs[1].params.equal = true;
        assert_matches!(traded_quantity(&m), Err(SettlementError::InvalidMatch(_)));
    }

    #[test]
    fn test_limit_must_cross_execution_price() {
        let m = sample("90");
        let maker_price = Some(&m.legs[0].order.price);
        assert_matches!(
            plan_leg(&m.legs[1], &dec("2"), maker_price, &pair(), &dec("0.2")),
            Err(SettlementError::InvalidMatch(_))
        );

        let mut m = sample("100");
        m.legs[0].order.price = dec("110");
        let taker_price = Some(&m.legs[1].order.price);
        assert_matches!(
            plan_leg(&m.legs[0], &dec("2"), taker_price, &pair(), &dec("0.1")),
            Err(SettlementError::InvalidMatch(_))
        );
    }

    #[test]
    fn test_fee_currency_must_match_received_asset() {
        let mut m = sample("100");
        m.legs[1].params.turn = false;
        assert_matches!(
            plan_leg(&m.legs[1], &dec("2"), None, &pair(), &dec("0.2")),
            Err(SettlementError::InvalidMatch(_))
        );
    }

    #[test]
    fn test_validate_rejects_mismatched_legs() {
        let mut m = sample("100");
        m.legs[1].order.assigning = Assigning::Sell;
        assert_matches!(validate(&m), Err(SettlementError::InvalidMatch(_)));

        let mut m = sample("100");
        m.legs[1].order.quote_unit = "eur".to_string();
        assert_matches!(validate(&m), Err(SettlementError::InvalidMatch(_)));

        let mut m = sample("100");
        m.legs[0].order.id = 0;
        assert_matches!(validate(&m), Err(SettlementError::InvalidMatch(_)));
    }

    #[test]
    fn test_options_from_config() {
        let mut settlement = config::SettlementConfig::default();
        settlement.candle_resolutions = vec!["1m".to_string(), "1d".to_string()];
        let options = SettlementOptions::from_config(&settlement).unwrap();
        assert_eq!(
            options.candle_resolutions,
            vec![CandleInterval::OneMinute, CandleInterval::OneDay]
        );

        settlement.candle_resolutions = vec!["7m".to_string()];
        assert_matches!(
            SettlementOptions::from_config(&settlement),
            Err(SettlementError::Config(_))
        );
    }
}
