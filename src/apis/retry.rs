use super::{Api, ApiError};
use crate::{Candle, Interval, MarketInfo, MarketType, Symbol, Trade, Venue};

use async_trait::async_trait;
use std::{future::Future, time::Duration};

/// Exponential backoff configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
    /// Zero means every request is attempted exactly once.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2,
            max_retries: 0,
        }
    }
}

impl RetryPolicy {
    pub fn with_retries(max_retries: u32) -> Self {
        RetryPolicy {
            max_retries,
            ..Default::default()
        }
    }

    /// Run `operation` until it succeeds, fails with a permanent error, or
    /// the retries are used up. The last error is returned.
    pub async fn run<F, Fut, T>(&self, what: &str, mut operation: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut backoff = self.initial_backoff;
        for attempt in 1..=self.max_retries {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    log::warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        what,
                        attempt,
                        self.max_retries + 1,
                        backoff,
                        err
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * self.multiplier).min(self.max_backoff);
                }
                Err(err) => return Err(err),
            }
        }

        operation().await
    }
}

/// The Retry API is a middleware that repeats requests failing with
/// transient errors (network, rate limit, server errors).
pub struct Retry<A>
where
    A: Api,
{
    api: A,
    policy: RetryPolicy,
}

impl<A> Retry<A>
where
    A: Api,
{
    pub fn new(api: A, policy: RetryPolicy) -> Self {
        Retry { api, policy }
    }
}

#[async_trait]
impl<A: Api> Api for Retry<A> {
    fn venue(&self) -> Venue {
        self.api.venue()
    }

    fn max_candle_batch(&self, market_type: MarketType) -> usize {
        self.api.max_candle_batch(market_type)
    }

    fn max_trade_batch(&self) -> usize {
        self.api.max_trade_batch()
    }

    fn rate_limit(&self) -> Duration {
        self.api.rate_limit()
    }

    fn interval_ms(&self, interval: Interval) -> Result<i64, ApiError> {
        self.api.interval_ms(interval)
    }

    fn now_ms(&self) -> i64 {
        self.api.now_ms()
    }

    async fn markets(&self) -> Result<Vec<MarketInfo>, ApiError> {
        self.policy.run("markets", || self.api.markets()).await
    }

    async fn fetch_candles(
        &self,
        symbol: Symbol,
        interval: Interval,
        since: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ApiError> {
        self.policy
            .run("fetch_candles", || {
                self.api.fetch_candles(symbol, interval, since, limit)
            })
            .await
    }

    async fn fetch_trades(
        &self,
        symbol: Symbol,
        since: i64,
        until: i64,
        limit: usize,
    ) -> Result<Vec<Trade>, ApiError> {
        self.policy
            .run("fetch_trades", || {
                self.api.fetch_trades(symbol, since, until, limit)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{apis::Mock, Side};

    fn trades() -> Vec<Trade> {
        vec![Trade {
            timestamp: 10,
            price: 1.0,
            amount: 1.0,
            side: Side::Buy,
        }]
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures() {
        let mock = Mock::new("retry")
            .with_now(100)
            .with_trades(trades())
            .fail_trade_request(1);
        let api = Retry::new(mock, RetryPolicy::with_retries(2));

        let fetched = api.fetch_trades(Symbol::perp("X"), 0, 100, 10).await.unwrap();

        assert_eq!(fetched, trades());
        assert_eq!(api.api.requests().len(), 2);
    }

    #[tokio::test]
    async fn no_retries_by_default() {
        let mock = Mock::new("retry")
            .with_now(100)
            .with_trades(trades())
            .fail_trade_request(1);
        let api = Retry::new(mock, RetryPolicy::default());

        let err = api.fetch_trades(Symbol::perp("X"), 0, 100, 10).await.unwrap_err();

        assert!(matches!(err, ApiError::Network(_)));
        assert_eq!(api.api.requests().len(), 1);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let policy = RetryPolicy::with_retries(3);
        let mut attempts = 0;
        let result: Result<(), ApiError> = policy
            .run("test", || {
                attempts += 1;
                async {
                    Err(ApiError::Api {
                        code: -1121,
                        msg: "Invalid symbol.".to_owned(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(ApiError::Api { code: -1121, .. })));
        assert_eq!(attempts, 1);
    }
}
