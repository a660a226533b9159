use super::{Api, ApiError};
use crate::{Candle, Interval, MarketInfo, MarketType, Symbol, Trade, Venue};

use async_trait::async_trait;
use std::{sync::Mutex, time::Duration};

/// A request received by a [`Mock`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Request {
    Candles { since: i64, limit: usize },
    Trades { since: i64, limit: usize },
}

/// The Mock API serves candles and trades from memory.
/// This is useful for testing pagination without a network.
pub struct Mock {
    venue: Venue,
    now: i64,
    rate_limit: Duration,
    max_candle_batch: usize,
    max_trade_batch: usize,
    markets: Vec<MarketInfo>,
    candles: Vec<Candle>,
    trades: Vec<Trade>,
    // Fail the n-th trade request (1-based).
    fail_trade_request: Option<usize>,
    requests: Mutex<Vec<Request>>,
}

impl Mock {
    pub fn new<R: AsRef<str>>(venue: R) -> Self {
        Mock {
            venue: Venue::new(venue),
            now: 0,
            rate_limit: Duration::ZERO,
            max_candle_batch: 200,
            max_trade_batch: 1000,
            markets: Vec::new(),
            candles: Vec::new(),
            trades: Vec::new(),
            fail_trade_request: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_now(mut self, now: i64) -> Self {
        self.now = now;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: Duration) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_batches(mut self, max_candle_batch: usize, max_trade_batch: usize) -> Self {
        self.max_candle_batch = max_candle_batch;
        self.max_trade_batch = max_trade_batch;
        self
    }

    pub fn with_markets(mut self, markets: Vec<MarketInfo>) -> Self {
        self.markets = markets;
        self
    }

    pub fn with_candles(mut self, mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|candle| candle.timestamp);
        self.candles = candles;
        self
    }

    pub fn with_trades(mut self, mut trades: Vec<Trade>) -> Self {
        trades.sort_by_key(|trade| trade.timestamp);
        self.trades = trades;
        self
    }

    pub fn fail_trade_request(mut self, nth: usize) -> Self {
        self.fail_trade_request = Some(nth);
        self
    }

    /// All requests received so far, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.log().clone()
    }

    fn log(&self) -> std::sync::MutexGuard<'_, Vec<Request>> {
        match self.requests.lock() {
            Ok(requests) => requests,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Api for Mock {
    fn venue(&self) -> Venue {
        self.venue
    }

    fn max_candle_batch(&self, _market_type: MarketType) -> usize {
        self.max_candle_batch
    }

    fn max_trade_batch(&self) -> usize {
        self.max_trade_batch
    }

    fn rate_limit(&self) -> Duration {
        self.rate_limit
    }

    fn now_ms(&self) -> i64 {
        self.now
    }

    async fn markets(&self) -> Result<Vec<MarketInfo>, ApiError> {
        Ok(self.markets.clone())
    }

    async fn fetch_candles(
        &self,
        _symbol: Symbol,
        _interval: Interval,
        since: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ApiError> {
        self.log().push(Request::Candles { since, limit });

        Ok(self
            .candles
            .iter()
            .filter(|candle| candle.timestamp >= since && candle.timestamp <= self.now)
            .take(limit)
            .copied()
            .collect())
    }

    async fn fetch_trades(
        &self,
        _symbol: Symbol,
        since: i64,
        until: i64,
        limit: usize,
    ) -> Result<Vec<Trade>, ApiError> {
        let nth = {
            let mut requests = self.log();
            requests.push(Request::Trades { since, limit });
            requests
                .iter()
                .filter(|request| matches!(request, Request::Trades { .. }))
                .count()
        };
        if self.fail_trade_request == Some(nth) {
            return Err(ApiError::Network(format!("trade request {} dropped", nth)));
        }

        Ok(self
            .trades
            .iter()
            .filter(|trade| {
                trade.timestamp >= since && trade.timestamp < until && trade.timestamp <= self.now
            })
            .take(limit)
            .copied()
            .collect())
    }
}
