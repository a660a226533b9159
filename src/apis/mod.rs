#[cfg(feature = "binance")]
mod binance;
mod mock;
mod retry;

#[cfg(feature = "binance")]
pub use self::binance::*;
pub use mock::*;
pub use retry::*;

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use thiserror::Error;

use crate::{Candle, Interval, MarketInfo, MarketType, Symbol, Trade, Venue};

/// A transport to one exchange. Implementations only move data, pagination
/// and rate limiting happen on top of this trait.
#[async_trait]
pub trait Api: Send + Sync {
    fn venue(&self) -> Venue;
    /// Maximum number of candles a single request may return.
    fn max_candle_batch(&self, market_type: MarketType) -> usize;
    /// Maximum number of trades a single request may return.
    fn max_trade_batch(&self) -> usize;
    /// Minimum spacing between two requests.
    fn rate_limit(&self) -> Duration;
    /// Length of an interval in milliseconds, if the venue serves it.
    fn interval_ms(&self, interval: Interval) -> Result<i64, ApiError> {
        Ok(interval.millis())
    }
    /// Current exchange time in milliseconds.
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
    /// List all markets provided by this API.
    async fn markets(&self) -> Result<Vec<MarketInfo>, ApiError>;
    /// Candles starting at or after `since`, oldest first.
    async fn fetch_candles(
        &self,
        symbol: Symbol,
        interval: Interval,
        since: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ApiError>;
    /// Trades executed in `[since, until)`, oldest first. Fewer than `limit`
    /// trades means the range is exhausted.
    async fn fetch_trades(
        &self,
        symbol: Symbol,
        since: i64,
        until: i64,
        limit: usize,
    ) -> Result<Vec<Trade>, ApiError>;
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Could not connect to the API: {0}")]
    Network(String),
    #[error("Rate limit exceeded (HTTP {0}).")]
    RateLimited(u16),
    #[error("Unexpected HTTP status {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Internal API error {code}: {msg}")]
    Api { code: i64, msg: String },
    #[error("Could not decode API response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Errors that may go away by simply asking again later.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network(_) | ApiError::RateLimited(_) => true,
            ApiError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
