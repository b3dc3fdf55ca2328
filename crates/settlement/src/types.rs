//! Settlement inputs and outcomes

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::{
    Allocation, Assignment, ChainId, Order, Platform, Protocol, TradeId, Transaction,
    TransactionId, TxStatus, TxType, UserId,
};

use crate::error::SettlementWarning;

/// Per-leg flags set by the matcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchParams {
    /// Quantity is taken from the counterparty's traded value
    #[serde(default)]
    pub equal: bool,
    /// This leg is the resting order; its price is authoritative
    #[serde(default)]
    pub maker: bool,
    /// Fee is charged in the base unit instead of the quote unit
    #[serde(default)]
    pub turn: bool,
}

/// One side of a match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedOrder {
    pub order: Order,
    /// Traded base quantity of this leg
    pub value: BigDecimal,
    #[serde(default)]
    pub params: MatchParams,
}

impl MatchedOrder {
    /// A leg whose fee is charged in the asset it receives
    pub fn new(order: Order, value: BigDecimal) -> Self {
        let turn = order.assigning.is_buy();
        Self {
            order,
            value,
            params: MatchParams {
                turn,
                ..MatchParams::default()
            },
        }
    }

    pub fn equal(mut self) -> Self {
        self.params.equal = true;
        self
    }
}

/// Two orders that crossed, keyed by a matcher-assigned id
///
/// Index 0 is the maker and index 1 the taker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// Idempotence key; settling the same id twice is a no-op
    pub match_id: Uuid,
    pub legs: [MatchedOrder; 2],
}

impl Match {
    pub fn new(match_id: Uuid, mut maker: MatchedOrder, mut taker: MatchedOrder) -> Self {
        maker.params.maker = true;
        taker.params.maker = false;
        Self {
            match_id,
            legs: [maker, taker],
        }
    }

    pub fn maker(&self) -> &MatchedOrder {
        &self.legs[0]
    }

    pub fn taker(&self) -> &MatchedOrder {
        &self.legs[1]
    }

    /// Traded value of the match
    pub fn value(&self) -> &BigDecimal {
        &self.legs[0].value
    }

    pub fn base_unit(&self) -> &str {
        &self.legs[0].order.base_unit
    }

    pub fn quote_unit(&self) -> &str {
        &self.legs[0].order.quote_unit
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Trade, transfers and balance changes committed
    Settled {
        trade_id: TradeId,
        transfers: Vec<i64>,
    },
    /// Zero traded value; nothing written
    Skipped,
    /// The match id was already settled; nothing written
    Duplicate,
}

/// Result of one settlement call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReport {
    pub match_id: Uuid,
    pub outcome: SettlementOutcome,
    pub warnings: Vec<SettlementWarning>,
}

impl SettlementReport {
    pub fn is_settled(&self) -> bool {
        matches!(self.outcome, SettlementOutcome::Settled { .. })
    }
}

/// An on-chain deposit or withdraw observed by a chain watcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEvent {
    /// Chain hash; only internal transfers may omit it
    #[serde(default)]
    pub hash: Option<String>,
    pub symbol: String,
    pub value: BigDecimal,
    #[serde(default)]
    pub fees: BigDecimal,
    #[serde(default)]
    pub confirmations: i64,
    /// Destination address
    pub to: String,
    #[serde(default)]
    pub block: i64,
    pub chain_id: ChainId,
    pub user_id: UserId,
    pub assignment: Assignment,
    #[serde(default)]
    pub tx_type: TxType,
    pub platform: Platform,
    pub protocol: Protocol,
    #[serde(default)]
    pub allocation: Allocation,
    #[serde(default)]
    pub parent: Option<TransactionId>,
}

impl ChainEvent {
    /// An external deposit with no fee and no confirmations yet
    #[allow(clippy::too_many_arguments)]
    pub fn deposit(
        hash: impl Into<String>,
        user_id: UserId,
        symbol: impl Into<String>,
        value: BigDecimal,
        to: impl Into<String>,
        chain_id: ChainId,
        platform: Platform,
        protocol: Protocol,
    ) -> Self {
        Self {
            hash: Some(hash.into()),
            symbol: symbol.into(),
            value,
            fees: BigDecimal::from(0),
            confirmations: 0,
            to: to.into(),
            block: 0,
            chain_id,
            user_id,
            assignment: Assignment::Deposit,
            tx_type: TxType::Crypto,
            platform,
            protocol,
            allocation: Allocation::External,
            parent: None,
        }
    }

    pub fn internal(mut self) -> Self {
        self.allocation = Allocation::Internal;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// First sighting of the hash; row stored as PENDING
    Created(Transaction),
    /// Internal transfer re-flagged as a user-visible deposit
    Reflagged(Transaction),
    /// Hash already recorded; nothing changed
    Duplicate { hash: String },
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::Created(_) => "created",
            IngestOutcome::Reflagged(_) => "reflagged",
            IngestOutcome::Duplicate { .. } => "duplicate",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    /// Below the chain's threshold; only the counter moved
    Waiting { confirmations: i64, required: i64 },
    /// PENDING → CONFIRMED, with the deposit credited
    Confirmed(Transaction),
    /// Already past PENDING; nothing changed
    AlreadyFinal(TxStatus),
}

/// Counts for one ingested block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockReport {
    pub chain_id: ChainId,
    pub block: i64,
    pub created: usize,
    pub reflagged: usize,
    pub duplicates: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Assigning, OrderType};

    fn order(assigning: Assigning) -> Order {
        Order::new(1, "btc", "usdt", assigning, OrderType::Limit, BigDecimal::from(100), BigDecimal::from(2))
    }

    #[test]
    fn test_match_places_maker_first() {
        let m = Match::new(
            Uuid::new_v4(),
            MatchedOrder::new(order(Assigning::Sell), BigDecimal::from(2)),
            MatchedOrder::new(order(Assigning::Buy), BigDecimal::from(2)).equal(),
        );
        assert!(m.maker().params.maker);
        assert!(!m.taker().params.maker);
        assert!(m.taker().params.turn);
        assert!(!m.maker().params.turn);
        assert_eq!(m.base_unit(), "btc");
    }

    #[test]
    fn test_event_defaults_from_json() {
        let event: ChainEvent = serde_json::from_value(serde_json::json!({
            "hash": "0xabc",
            "symbol": "usdt",
            "value": "25",
            "to": "TXaddr",
            "chain_id": 2,
            "user_id": 9,
            "assignment": "deposit",
            "platform": "tron",
            "protocol": "trc20"
        }))
        .unwrap();
        assert_eq!(event.allocation, Allocation::External);
        assert_eq!(event.parent, None);
        assert_eq!(event.fees, BigDecimal::from(0));
    }
}
