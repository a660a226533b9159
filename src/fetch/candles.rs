use super::FetchCursor;
use crate::{
    apis::{Api, ApiError},
    Candle, Interval, RateLimiter, Symbol,
};
use futures_util::stream::{self, Stream, TryStreamExt};

/// The last `count` candles of an interval before `now`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CandleWindow {
    pub count: usize,
    pub interval_ms: i64,
    pub now: i64,
}

impl CandleWindow {
    pub fn start(&self) -> FetchCursor {
        FetchCursor::new(self.now - self.count as i64 * self.interval_ms)
    }
}

/// Where to continue after a candle page, `None` when the series is complete.
///
/// `fetched` is the number of accepted candles including this page.
pub fn next_candle_cursor(
    window: &CandleWindow,
    cursor: FetchCursor,
    page: &[Candle],
    fetched: usize,
) -> Option<FetchCursor> {
    let last = page.last()?;
    if fetched >= window.count || last.timestamp >= window.now {
        return None;
    }
    cursor.after(last.timestamp)
}

/// Candle pages of `window`, oldest first, one request per page.
///
/// Candles before the cursor or after `now` are dropped from the pages, so
/// the concatenation is strictly increasing in time.
pub fn candle_pages<'a, A>(
    api: &'a A,
    limiter: &'a RateLimiter,
    symbol: Symbol,
    interval: Interval,
    window: CandleWindow,
) -> impl Stream<Item = Result<Vec<Candle>, ApiError>> + 'a
where
    A: Api + ?Sized + 'a,
{
    let max_batch = api.max_candle_batch(symbol.market_type()).max(1);

    stream::unfold(Some((window.start(), 0)), move |state| async move {
        let (cursor, fetched): (FetchCursor, usize) = state?;
        let remaining = window.count.saturating_sub(fetched);
        if remaining == 0 {
            return None;
        }
        let limit = remaining.min(max_batch);

        limiter.wait().await;
        log::trace!(
            "Fetching {} {} candles of {} since {}.",
            limit,
            interval,
            symbol,
            cursor.since
        );
        let raw = match api.fetch_candles(symbol, interval, cursor.since, limit).await {
            Ok(raw) => raw,
            Err(err) => return Some((Err(err), None)),
        };
        if raw.is_empty() {
            log::debug!("No candles of {} after {}, history exhausted.", symbol, cursor.since);
            return None;
        }

        let mut previous = cursor.since - 1;
        let page: Vec<Candle> = raw
            .iter()
            .filter(|candle| {
                let accept = candle.timestamp > previous && candle.timestamp <= window.now;
                if accept {
                    previous = candle.timestamp;
                }
                accept
            })
            .copied()
            .collect();
        let fetched = fetched + page.len();

        let next = next_candle_cursor(&window, cursor, &raw, fetched);
        if next.is_none() && fetched < window.count && raw.len() == limit {
            log::warn!("Candle cursor of {} stopped moving at {}.", symbol, cursor.since);
        }

        Some((Ok(page), next.map(|cursor| (cursor, fetched))))
    })
}

/// The last `window.count` candles, oldest first.
///
/// Returns fewer candles when the venue runs out of history, which is logged
/// but not an error.
pub async fn fetch_candles<A>(
    api: &A,
    limiter: &RateLimiter,
    symbol: Symbol,
    interval: Interval,
    window: CandleWindow,
) -> Result<Vec<Candle>, ApiError>
where
    A: Api + ?Sized,
{
    let mut candles: Vec<Candle> = candle_pages(api, limiter, symbol, interval, window)
        .try_concat()
        .await?;
    candles.truncate(window.count);

    if candles.len() < window.count {
        log::warn!(
            "Only {} of {} {} candles available for {} on {}.",
            candles.len(),
            window.count,
            interval,
            symbol,
            api.venue()
        );
    } else {
        log::debug!("Fetched {} {} candles of {}.", candles.len(), interval, symbol);
    }

    Ok(candles)
}
