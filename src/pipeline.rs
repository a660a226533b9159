use crate::{
    apis::Api,
    fetch::{fetch_candles, fetch_trades, CandleWindow, TradeWindow},
    Candle, EnrichedCandle, Error, Interval, RateLimiter, Symbol, VolumeProfile,
};
use futures_util::{
    future,
    stream::{self, Stream, StreamExt, TryStreamExt},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::time::Instant;

/// What to fetch for every symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Candle interval.
    pub interval: Interval,
    /// Number of most recent candles.
    pub candles: usize,
    /// Number of price bins per volume profile.
    pub bins: usize,
    /// Number of trade windows fetched at once per symbol.
    pub concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            interval: Interval::M3,
            candles: 50000,
            bins: 5,
            concurrency: 1,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), Error> {
        if self.bins == 0 {
            return Err(Error::Config("bins must be at least 1".to_owned()));
        }
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_owned()));
        }
        Ok(())
    }
}

/// Shared flag that stops pipelines before their next trade window.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Turns the candle history of one symbol into enriched candles.
pub struct Pipeline<'a, A>
where
    A: Api + ?Sized,
{
    api: &'a A,
    limiter: &'a RateLimiter,
    symbol: Symbol,
    settings: Settings,
    interval_ms: i64,
    now: i64,
    cancel: CancelToken,
}

impl<'a, A> Pipeline<'a, A>
where
    A: Api + ?Sized + 'a,
{
    /// Prepare a pipeline. The current time is read from the transport once,
    /// here, and anchors the whole candle window.
    pub fn new(
        api: &'a A,
        limiter: &'a RateLimiter,
        symbol: Symbol,
        settings: Settings,
        cancel: CancelToken,
    ) -> Result<Self, Error> {
        settings.validate()?;
        let interval_ms = api.interval_ms(settings.interval)?;

        Ok(Pipeline {
            api,
            limiter,
            symbol,
            settings,
            interval_ms,
            now: api.now_ms(),
            cancel,
        })
    }

    pub fn now(&self) -> i64 {
        self.now
    }

    /// Enriched candles, oldest first.
    ///
    /// Nothing is requested until the stream is polled. The stream ends after
    /// the first error.
    pub fn run(self) -> impl Stream<Item = Result<EnrichedCandle, Error>> + 'a {
        let Pipeline {
            api,
            limiter,
            symbol,
            settings,
            interval_ms,
            now,
            cancel,
        } = self;
        let window = CandleWindow {
            count: settings.candles,
            interval_ms,
            now,
        };

        stream::once(async move {
            fetch_candles(api, limiter, symbol, settings.interval, window)
                .await
                .map_err(Error::from)
        })
        .map_ok(move |candles| {
            let mut progress = Progress::new(symbol, candles.len());
            let cancel = cancel.clone();
            stream::iter(candles)
                .map(move |candle| {
                    enrich(api, limiter, symbol, candle, interval_ms, settings.bins, cancel.clone())
                })
                .buffered(settings.concurrency.max(1))
                .inspect_ok(move |_| progress.advance())
        })
        .try_flatten()
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            *failed = item.is_err();
            future::ready(Some(item))
        })
    }
}

async fn enrich<A>(
    api: &A,
    limiter: &RateLimiter,
    symbol: Symbol,
    candle: Candle,
    interval_ms: i64,
    bins: usize,
    cancel: CancelToken,
) -> Result<EnrichedCandle, Error>
where
    A: Api + ?Sized,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let window = TradeWindow::new(candle.timestamp, candle.end(interval_ms));
    let trades = fetch_trades(api, limiter, symbol, window).await?;
    let profile = VolumeProfile::aggregate(&trades, bins, (candle.low, candle.high));

    Ok(EnrichedCandle { candle, profile })
}

// Logs percentage and estimated time left, at most once per percent.
struct Progress {
    symbol: Symbol,
    total: usize,
    done: usize,
    step: usize,
    started: Instant,
}

impl Progress {
    fn new(symbol: Symbol, total: usize) -> Self {
        Progress {
            symbol,
            total,
            done: 0,
            step: (total / 100).max(1),
            started: Instant::now(),
        }
    }

    fn advance(&mut self) {
        self.done += 1;
        if self.done % self.step != 0 && self.done != self.total {
            return;
        }

        let progress = self.done as f64 / self.total as f64;
        let elapsed = self.started.elapsed().as_secs_f64();
        let eta = elapsed / progress - elapsed;
        log::info!(
            "{}: {:.0}% ({}/{}), about {:.0}s left.",
            self.symbol,
            progress * 100.0,
            self.done,
            self.total,
            eta
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        apis::{Mock, Request},
        Side, Trade,
    };
    use std::time::Duration;

    const MINUTE: i64 = 60_000;

    fn candle(timestamp: i64) -> Candle {
        Candle {
            timestamp,
            open: 100.0,
            high: 120.0,
            low: 90.0,
            close: 110.0,
            volume: 3.0,
        }
    }

    fn trade(timestamp: i64, price: f64, amount: f64, side: Side) -> Trade {
        Trade {
            timestamp,
            price,
            amount,
            side,
        }
    }

    // Three one-minute candles ending right before `now`, trades in the first two.
    fn mock() -> Mock {
        Mock::new("pipeline")
            .with_now(3 * MINUTE)
            .with_candles(vec![candle(0), candle(MINUTE), candle(2 * MINUTE)])
            .with_trades(vec![
                trade(5, 100.0, 1.0, Side::Sell),
                trade(MINUTE - 1, 110.0, 2.0, Side::Buy),
                trade(MINUTE, 95.0, 0.5, Side::Buy),
                trade(MINUTE + 10, 105.0, 0.25, Side::Sell),
            ])
    }

    fn settings(concurrency: usize) -> Settings {
        Settings {
            interval: Interval::M1,
            candles: 3,
            bins: 2,
            concurrency,
        }
    }

    #[test]
    fn validate_rejects_zero() {
        assert!(Settings::default().validate().is_ok());
        let zero_bins = Settings {
            bins: 0,
            ..Settings::default()
        };
        assert!(matches!(zero_bins.validate(), Err(Error::Config(_))));
        let zero_concurrency = Settings {
            concurrency: 0,
            ..Settings::default()
        };
        assert!(matches!(zero_concurrency.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn enriches_every_candle_in_order() {
        let api = mock();
        let limiter = RateLimiter::new(Duration::ZERO);
        let pipeline = Pipeline::new(&api, &limiter, Symbol::perp("X"), settings(1), CancelToken::new()).unwrap();

        let enriched: Vec<EnrichedCandle> = pipeline.run().try_collect().await.unwrap();

        let timestamps: Vec<i64> = enriched.iter().map(|e| e.candle.timestamp).collect();
        assert_eq!(timestamps, vec![0, MINUTE, 2 * MINUTE]);

        let first = &enriched[0].profile;
        assert_eq!(first.bin_upper_bounds, vec![105.0, 110.0]);
        assert_eq!(first.sell_amounts, vec![1.0, 0.0]);
        assert_eq!(first.buy_amounts, vec![0.0, 2.0]);

        let second = enriched[1].record();
        assert_eq!(second.bid_volume_sum, 0.25);
        assert_eq!(second.ask_volume_sum, 0.5);
        assert_eq!(second.delta, 0.25);

        // No trades: zero profile spread over the candle's own range.
        let third = &enriched[2];
        assert_eq!(third.profile.bin_upper_bounds, vec![105.0, 120.0]);
        assert_eq!(third.record().delta, 0.0);
    }

    #[tokio::test]
    async fn concurrency_keeps_candle_order() {
        let sequential: Vec<EnrichedCandle> = {
            let api = mock();
            let limiter = RateLimiter::new(Duration::ZERO);
            let pipeline = Pipeline::new(&api, &limiter, Symbol::perp("X"), settings(1), CancelToken::new()).unwrap();
            pipeline.run().try_collect().await.unwrap()
        };
        let concurrent: Vec<EnrichedCandle> = {
            let api = mock();
            let limiter = RateLimiter::new(Duration::ZERO);
            let pipeline = Pipeline::new(&api, &limiter, Symbol::perp("X"), settings(3), CancelToken::new()).unwrap();
            pipeline.run().try_collect().await.unwrap()
        };

        assert_eq!(sequential, concurrent);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_windows_share_rate_limit() {
        let api = mock();
        let limiter = RateLimiter::new(Duration::from_millis(100));
        let start = Instant::now();
        let pipeline = Pipeline::new(&api, &limiter, Symbol::perp("X"), settings(3), CancelToken::new()).unwrap();

        let enriched: Vec<EnrichedCandle> = pipeline.run().try_collect().await.unwrap();

        assert_eq!(enriched.len(), 3);
        // One candle request and three trade requests.
        assert_eq!(api.requests().len(), 4);
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn nothing_is_fetched_before_polling() {
        let api = mock();
        let limiter = RateLimiter::new(Duration::ZERO);
        let pipeline = Pipeline::new(&api, &limiter, Symbol::perp("X"), settings(1), CancelToken::new()).unwrap();
        assert_eq!(pipeline.now(), 3 * MINUTE);

        let stream = pipeline.run();
        assert!(api.requests().is_empty());
        drop(stream);
    }

    #[tokio::test]
    async fn cancelled_before_trade_fetch() {
        let api = mock();
        let limiter = RateLimiter::new(Duration::ZERO);
        let cancel = CancelToken::new();
        cancel.cancel();
        let pipeline = Pipeline::new(&api, &limiter, Symbol::perp("X"), settings(1), cancel).unwrap();

        let result: Result<Vec<EnrichedCandle>, Error> = pipeline.run().try_collect().await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(api
            .requests()
            .iter()
            .all(|request| matches!(request, Request::Candles { .. })));
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected() {
        let api = mock();
        let limiter = RateLimiter::new(Duration::ZERO);
        let settings = Settings {
            bins: 0,
            ..settings(1)
        };

        let result = Pipeline::new(&api, &limiter, Symbol::perp("X"), settings, CancelToken::new());

        assert!(matches!(result, Err(Error::Config(_))));
    }
}
