//! Reference data: currencies, chains, pairs and contracts
//!
//! Administered out of band. The ledger reads these as lookup tables and
//! only ever writes the `fees_charges` accrual counter on [`Currency`].

use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};

use crate::types::{ChainId, Platform, Protocol, TxType};

/// Tradable currency and its fee schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Currency {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub symbol: String,
    #[serde(default = "BigDecimal::zero")]
    pub min_withdraw: BigDecimal,
    #[serde(default = "BigDecimal::zero")]
    pub max_withdraw: BigDecimal,
    #[serde(default = "BigDecimal::zero")]
    pub min_trade: BigDecimal,
    #[serde(default = "BigDecimal::zero")]
    pub max_trade: BigDecimal,
    /// Trade fee in percent
    #[serde(default = "BigDecimal::zero")]
    pub fees_trade: BigDecimal,
    /// Maker discount in percent, subtracted from `fees_trade`
    #[serde(default = "BigDecimal::zero")]
    pub fees_discount: BigDecimal,
    /// Running total of fees accrued in this currency
    #[serde(default = "BigDecimal::zero")]
    pub fees_charges: BigDecimal,
    #[serde(default = "BigDecimal::zero")]
    pub fees_costs: BigDecimal,
    #[serde(default)]
    pub marker: bool,
    #[serde(default = "default_true")]
    pub status: bool,
    #[serde(default)]
    pub tx_type: TxType,
    #[serde(default)]
    pub chains: Vec<ChainId>,
}

impl Currency {
    /// Inclusive trade size bounds, `None` for an unbounded max
    pub fn trade_range(&self) -> (BigDecimal, Option<BigDecimal>) {
        let max = if self.max_trade.is_zero() {
            None
        } else {
            Some(self.max_trade.clone())
        };
        (self.min_trade.clone(), max)
    }

    /// Whether `quantity` lies within the trade bounds
    pub fn accepts_trade(&self, quantity: &BigDecimal) -> bool {
        let (min, max) = self.trade_range();
        quantity >= &min && max.map_or(true, |max| quantity <= &max)
    }
}

/// Blockchain network metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    pub id: ChainId,
    pub name: String,
    /// Node endpoint, operational config
    #[serde(default)]
    pub rpc: String,
    #[serde(default)]
    pub block: i64,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub explorer_link: String,
    pub platform: Platform,
    /// Confirmations required before a deposit is credited
    #[serde(default = "default_confirmation")]
    pub confirmation: i64,
    #[serde(default)]
    pub time_withdraw: i64,
    #[serde(default = "BigDecimal::zero")]
    pub fees: BigDecimal,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub parent_symbol: String,
    #[serde(default)]
    pub decimals: u32,
    #[serde(default = "default_true")]
    pub status: bool,
}

impl Chain {
    /// Copy of the chain without its RPC endpoint and id
    pub fn snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            name: self.name.clone(),
            block: self.block,
            network: self.network.clone(),
            explorer_link: self.explorer_link.clone(),
            platform: self.platform,
            confirmation: self.confirmation,
            time_withdraw: self.time_withdraw,
            fees: self.fees.clone(),
            tag: self.tag.clone(),
            parent_symbol: self.parent_symbol.clone(),
            decimals: self.decimals,
            status: self.status,
        }
    }
}

/// Chain metadata embedded in a transaction row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub name: String,
    pub block: i64,
    pub network: String,
    pub explorer_link: String,
    pub platform: Platform,
    pub confirmation: i64,
    pub time_withdraw: i64,
    pub fees: BigDecimal,
    pub tag: String,
    pub parent_symbol: String,
    pub decimals: u32,
    pub status: bool,
}

/// Trading pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pair {
    #[serde(default)]
    pub id: i64,
    pub base_unit: String,
    pub quote_unit: String,
    #[serde(default = "BigDecimal::zero")]
    pub price: BigDecimal,
    /// Scale of amounts in the base unit
    #[serde(default = "default_decimals")]
    pub base_decimal: u32,
    /// Scale of amounts in the quote unit
    #[serde(default = "default_decimals")]
    pub quote_decimal: u32,
    #[serde(default = "default_true")]
    pub status: bool,
}

impl Pair {
    /// Scale used for amounts denominated in `symbol`
    pub fn scale_of(&self, symbol: &str) -> Option<u32> {
        if symbol == self.base_unit {
            Some(self.base_decimal)
        } else if symbol == self.quote_unit {
            Some(self.quote_decimal)
        } else {
            None
        }
    }
}

/// Token contract deployed on a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    #[serde(default)]
    pub id: i64,
    pub symbol: String,
    pub chain_id: ChainId,
    pub address: String,
    #[serde(default = "BigDecimal::zero")]
    pub fees: BigDecimal,
    pub protocol: Protocol,
    #[serde(default)]
    pub decimals: u32,
    pub platform: Platform,
}

/// Bundle of reference tables, used to seed a store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceData {
    pub currencies: Vec<Currency>,
    pub chains: Vec<Chain>,
    pub pairs: Vec<Pair>,
    pub contracts: Vec<Contract>,
}

impl ReferenceData {
    pub fn is_empty(&self) -> bool {
        self.currencies.is_empty()
            && self.chains.is_empty()
            && self.pairs.is_empty()
            && self.contracts.is_empty()
    }
}

fn default_true() -> bool {
    true
}

fn default_confirmation() -> i64 {
    3
}

fn default_decimals() -> u32 {
    8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn chain() -> Chain {
        Chain {
            id: 4,
            name: "Ethereum".to_string(),
            rpc: "http://node:8545".to_string(),
            block: 120,
            network: "mainnet".to_string(),
            explorer_link: String::new(),
            platform: Platform::Ethereum,
            confirmation: 12,
            time_withdraw: 0,
            fees: BigDecimal::zero(),
            tag: "eth".to_string(),
            parent_symbol: "eth".to_string(),
            decimals: 18,
            status: true,
        }
    }

    #[test]
    fn test_snapshot_drops_operational_fields() {
        let json = serde_json::to_value(chain().snapshot()).unwrap();
        assert!(json.get("rpc").is_none());
        assert!(json.get("id").is_none());
        assert_eq!(json["confirmation"], 12);
    }

    #[test]
    fn test_trade_range() {
        let currency: Currency = serde_json::from_value(serde_json::json!({
            "name": "Bitcoin",
            "symbol": "btc",
            "min_trade": "0.001",
            "max_trade": "10"
        }))
        .unwrap();

        assert!(currency.status);
        assert!(currency.accepts_trade(&BigDecimal::from_str("0.5").unwrap()));
        assert!(!currency.accepts_trade(&BigDecimal::from_str("0.0001").unwrap()));
        assert!(!currency.accepts_trade(&BigDecimal::from(11)));
    }

    #[test]
    fn test_pair_scale_of() {
        let pair = Pair {
            id: 1,
            base_unit: "btc".to_string(),
            quote_unit: "usdt".to_string(),
            price: BigDecimal::zero(),
            base_decimal: 8,
            quote_decimal: 2,
            status: true,
        };
        assert_eq!(pair.scale_of("usdt"), Some(2));
        assert_eq!(pair.scale_of("eth"), None);
    }
}
