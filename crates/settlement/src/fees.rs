//! Trade fee rates and fixed-point fee splitting

use bigdecimal::{BigDecimal, Zero};
use std::sync::Arc;

use common::{decimal, Currency};
use storage::LedgerStore;

use crate::error::SettlementError;
use crate::Result;

/// Fee rates from the currency table
///
/// Rates are percentages. A maker pays `fees_trade - fees_discount`,
/// a taker pays `fees_trade`.
#[derive(Clone)]
pub struct FeeCalculator {
    store: Arc<dyn LedgerStore>,
}

impl FeeCalculator {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Rate for `symbol`; an unknown currency is `NotFound`
    pub async fn rate(&self, symbol: &str, is_maker: bool) -> Result<BigDecimal> {
        let currency = self
            .store
            .currency(symbol)
            .await?
            .ok_or_else(|| SettlementError::NotFound(format!("currency {}", symbol)))?;
        Ok(Self::rate_for(&currency, is_maker))
    }

    /// Rate from an already loaded currency, floored at zero
    pub fn rate_for(currency: &Currency, is_maker: bool) -> BigDecimal {
        let rate = if is_maker {
            &currency.fees_trade - &currency.fees_discount
        } else {
            currency.fees_trade.clone()
        };
        if rate < BigDecimal::zero() {
            BigDecimal::zero()
        } else {
            rate
        }
    }

    /// Split `value` into `(net, fee)` at `rate` percent
    ///
    /// The fee is rounded half-up to `scale` digits and the net is the exact
    /// remainder, so `net + fee == value`.
    pub fn gross_to_net(value: &BigDecimal, rate: &BigDecimal, scale: u32) -> (BigDecimal, BigDecimal) {
        let fee = decimal::round(&decimal::percent_of(value, rate), scale);
        (value - &fee, fee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::str::FromStr;
    use storage::InMemoryLedgerStore;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn currency(trade: &str, discount: &str) -> Currency {
        serde_json::from_value(serde_json::json!({
            "name": "Tether",
            "symbol": "usdt",
            "fees_trade": trade,
            "fees_discount": discount
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_maker_discount() {
        let store = Arc::new(InMemoryLedgerStore::new());
        store.put_currency(currency("0.2", "0.05")).await;
        let fees = FeeCalculator::new(store);

        assert_eq!(fees.rate("usdt", false).await.unwrap(), dec("0.2"));
        assert_eq!(fees.rate("usdt", true).await.unwrap(), dec("0.15"));
        assert_matches!(fees.rate("eur", true).await, Err(SettlementError::NotFound(_)));
    }

    #[test]
    fn test_discount_above_rate_floors_at_zero() {
        assert_eq!(FeeCalculator::rate_for(&currency("0.1", "0.3"), true), dec("0"));
    }

    #[test]
    fn test_gross_to_net_is_exact() {
        let (net, fee) = FeeCalculator::gross_to_net(&dec("200"), &dec("0.1"), 2);
        assert_eq!(fee, dec("0.20"));
        assert_eq!(net, dec("199.80"));

        let value = dec("1.23456789");
        let (net, fee) = FeeCalculator::gross_to_net(&value, &dec("0.2"), 8);
        assert_eq!(fee, dec("0.00246914"));
        assert_eq!(&net + &fee, value);
    }

    #[test]
    fn test_zero_rate() {
        let (net, fee) = FeeCalculator::gross_to_net(&dec("5"), &dec("0"), 8);
        assert_eq!(net, dec("5"));
        assert!(fee.is_zero());
    }
}
