//! Market data error types

use thiserror::Error;

/// Errors that can occur during market data operations
#[derive(Error, Debug)]
pub enum MarketDataError {
    /// Unknown candle resolution
    #[error("Invalid candle interval: {0}")]
    InvalidInterval(String),

    /// Data not available
    #[error("Data not available: {0}")]
    DataNotAvailable(String),
}
