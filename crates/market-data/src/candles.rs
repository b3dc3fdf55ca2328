//! OHLCV candles derived from settled trades
//!
//! Candles are a read-after-write projection of the `trades` table: the
//! settlement engine recomputes the latest ones for a pair after each
//! commit and publishes them. Nothing here writes ledger state.

use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{decimal, Trade};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::MarketDataError;

/// Candle resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CandleInterval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    FourHours,
    OneDay,
}

impl CandleInterval {
    pub const ALL: [CandleInterval; 6] = [
        CandleInterval::OneMinute,
        CandleInterval::FiveMinutes,
        CandleInterval::FifteenMinutes,
        CandleInterval::OneHour,
        CandleInterval::FourHours,
        CandleInterval::OneDay,
    ];

    pub fn as_seconds(&self) -> i64 {
        match self {
            CandleInterval::OneMinute => 60,
            CandleInterval::FiveMinutes => 300,
            CandleInterval::FifteenMinutes => 900,
            CandleInterval::OneHour => 3600,
            CandleInterval::FourHours => 14400,
            CandleInterval::OneDay => 86400,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CandleInterval::OneMinute => "1m",
            CandleInterval::FiveMinutes => "5m",
            CandleInterval::FifteenMinutes => "15m",
            CandleInterval::OneHour => "1h",
            CandleInterval::FourHours => "4h",
            CandleInterval::OneDay => "1d",
        }
    }

    /// Start of the bucket containing `timestamp`
    pub fn open_time(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let step = self.as_seconds();
        let open = timestamp.timestamp().div_euclid(step) * step;
        Utc.timestamp_opt(open, 0).single().unwrap_or(timestamp)
    }

    /// Earliest trade time that can contribute to the newest `count` buckets
    pub fn lookback(&self, now: DateTime<Utc>, count: usize) -> DateTime<Utc> {
        let buckets = i64::try_from(count.saturating_sub(1)).unwrap_or(i64::MAX / self.as_seconds());
        self.open_time(now) - Duration::seconds(buckets * self.as_seconds())
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CandleInterval {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CandleInterval::ALL
            .into_iter()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| MarketDataError::InvalidInterval(s.to_string()))
    }
}

impl TryFrom<String> for CandleInterval {
    type Error = MarketDataError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<CandleInterval> for String {
    fn from(interval: CandleInterval) -> Self {
        interval.as_str().to_string()
    }
}

/// One OHLCV bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub interval: CandleInterval,
    pub open: BigDecimal,
    pub high: BigDecimal,
    pub low: BigDecimal,
    pub close: BigDecimal,
    /// Base-unit volume
    pub volume: BigDecimal,
    pub trade_count: u64,
}

impl Candle {
    pub fn with_price(
        open_time: DateTime<Utc>,
        interval: CandleInterval,
        price: &BigDecimal,
        quantity: &BigDecimal,
    ) -> Self {
        Self {
            open_time,
            interval,
            open: price.clone(),
            high: price.clone(),
            low: price.clone(),
            close: price.clone(),
            volume: quantity.clone(),
            trade_count: 1,
        }
    }

    pub fn update(&mut self, price: &BigDecimal, quantity: &BigDecimal) {
        if price > &self.high {
            self.high = price.clone();
        }
        if price < &self.low {
            self.low = price.clone();
        }
        self.close = price.clone();
        self.volume += quantity;
        self.trade_count += 1;
    }

    pub fn is_closed(&self, now: DateTime<Utc>) -> bool {
        (now - self.open_time).num_seconds() >= self.interval.as_seconds()
    }
}

/// Bucket `trades` and return the newest `limit` candles, newest first
///
/// Trades are applied in `(created_at, id)` order so open and close are
/// well defined when several trades share a timestamp.
pub fn latest_candles(trades: &[Trade], interval: CandleInterval, limit: usize) -> Vec<Candle> {
    let mut ordered: Vec<&Trade> = trades.iter().collect();
    ordered.sort_by_key(|t| (t.created_at, t.id));

    let mut buckets: BTreeMap<DateTime<Utc>, Candle> = BTreeMap::new();
    for trade in ordered {
        let open_time = interval.open_time(trade.created_at);
        buckets
            .entry(open_time)
            .and_modify(|c| c.update(&trade.price, &trade.quantity))
            .or_insert_with(|| Candle::with_price(open_time, interval, &trade.price, &trade.quantity));
    }

    buckets.into_values().rev().take(limit).collect()
}

/// Total base volume across candles
pub fn total_volume(candles: &[Candle]) -> BigDecimal {
    candles
        .iter()
        .fold(BigDecimal::zero(), |acc, c| acc + &c.volume)
}

/// Percent change of the newest close against the one before it
///
/// Expects candles newest first; zero with fewer than two candles.
pub fn price_change(candles: &[Candle]) -> BigDecimal {
    match candles {
        [newest, previous, ..] => {
            decimal::change_percent(&previous.close, &newest.close).unwrap_or_default()
        }
        _ => BigDecimal::zero(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Assigning;
    use uuid::Uuid;

    fn base_time() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_040, 0).single().unwrap()
    }

    fn trade(id: i64, price: i64, quantity: i64, seconds_offset: i64) -> Trade {
        Trade {
            id,
            match_id: Uuid::new_v4(),
            maker_order_id: 1,
            taker_order_id: 2,
            assigning: Assigning::Buy,
            user_id: 1,
            base_unit: "btc".to_string(),
            quote_unit: "usdt".to_string(),
            quantity: BigDecimal::from(quantity),
            price: BigDecimal::from(price),
            fees: BigDecimal::zero(),
            maker: false,
            created_at: base_time() + Duration::seconds(seconds_offset),
        }
    }

    #[test]
    fn test_single_bucket_ohlcv() {
        let trades = vec![
            trade(1, 50000, 1, 0),
            trade(2, 51000, 2, 5),
            trade(3, 50500, 3, 10),
        ];

        let candles = latest_candles(&trades, CandleInterval::OneMinute, 2);
        assert_eq!(candles.len(), 1);
        let c = &candles[0];
        assert_eq!(c.open, BigDecimal::from(50000));
        assert_eq!(c.high, BigDecimal::from(51000));
        assert_eq!(c.low, BigDecimal::from(50000));
        assert_eq!(c.close, BigDecimal::from(50500));
        assert_eq!(c.volume, BigDecimal::from(6));
        assert_eq!(c.trade_count, 3);
    }

    #[test]
    fn test_newest_first_and_limit() {
        let trades: Vec<Trade> = (0..5).map(|i| trade(i, 100 + i, 1, i * 60)).collect();

        let candles = latest_candles(&trades, CandleInterval::OneMinute, 2);
        assert_eq!(candles.len(), 2);
        assert!(candles[0].open_time > candles[1].open_time);
        assert_eq!(candles[0].close, BigDecimal::from(104));
    }

    #[test]
    fn test_coarser_interval_merges() {
        let trades: Vec<Trade> = (0..3).map(|i| trade(i, 100, 1, i * 60)).collect();
        let candles = latest_candles(&trades, CandleInterval::OneHour, 2);
        assert_eq!(candles.len(), 1);
        assert_eq!(total_volume(&candles), BigDecimal::from(3));
    }

    #[test]
    fn test_price_change_of_two_newest() {
        let trades = vec![trade(1, 200, 1, 0), trade(2, 210, 1, 60), trade(3, 189, 1, 120)];
        let candles = latest_candles(&trades, CandleInterval::OneMinute, 2);
        assert_eq!(price_change(&candles), BigDecimal::from(-10));
        assert_eq!(price_change(&candles[..1]), BigDecimal::zero());
    }

    #[test]
    fn test_open_time_and_lookback() {
        let t = Utc.timestamp_opt(3_725, 0).single().unwrap();
        assert_eq!(CandleInterval::OneHour.open_time(t).timestamp(), 3_600);
        assert_eq!(CandleInterval::OneMinute.lookback(t, 2).timestamp(), 3_660);
    }

    #[test]
    fn test_interval_text() {
        assert_eq!("4h".parse::<CandleInterval>().unwrap(), CandleInterval::FourHours);
        assert!("2h".parse::<CandleInterval>().is_err());
        assert_eq!(serde_json::to_string(&CandleInterval::OneDay).unwrap(), "\"1d\"");
    }
}
