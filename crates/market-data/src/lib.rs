//! Market data projections for the OpenExchange spot ledger
//!
//! - [`candles`] - OHLCV candles recomputed from settled trades
//!
//! Market data never writes ledger state; it is a pure projection.

pub mod candles;
pub mod error;

pub use candles::{latest_candles, price_change, total_volume, Candle, CandleInterval};
pub use error::MarketDataError;

pub type Result<T> = std::result::Result<T, MarketDataError>;
