use super::FetchCursor;
use crate::{
    apis::{Api, ApiError},
    RateLimiter, Symbol, Trade,
};
use futures_util::stream::{self, Stream, TryStreamExt};

/// Half-open time range `[start, end)` in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TradeWindow {
    pub start: i64,
    pub end: i64,
}

impl TradeWindow {
    pub fn new(start: i64, end: i64) -> Self {
        TradeWindow { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Where to continue after a raw trade page of a request for `limit` trades,
/// `None` once the window is exhausted.
pub fn next_trade_cursor(
    window: &TradeWindow,
    cursor: FetchCursor,
    raw: &[Trade],
    limit: usize,
) -> Option<FetchCursor> {
    let last = raw.last()?;
    if raw.len() < limit {
        return None;
    }
    cursor
        .after(last.timestamp)
        .filter(|next| next.since < window.end)
}

/// Pages of trades inside `window`, oldest first.
pub fn trade_pages<'a, A>(
    api: &'a A,
    limiter: &'a RateLimiter,
    symbol: Symbol,
    window: TradeWindow,
) -> impl Stream<Item = Result<Vec<Trade>, ApiError>> + 'a
where
    A: Api + ?Sized + 'a,
{
    let limit = api.max_trade_batch().max(1);
    let start = if window.is_empty() {
        None
    } else {
        Some(FetchCursor::new(window.start))
    };

    stream::unfold(start, move |cursor| async move {
        let cursor = cursor?;

        limiter.wait().await;
        log::trace!("Fetching {} trades of {} since {}.", limit, symbol, cursor.since);
        let raw = match api.fetch_trades(symbol, cursor.since, window.end, limit).await {
            Ok(raw) => raw,
            Err(err) => return Some((Err(err), None)),
        };

        let next = next_trade_cursor(&window, cursor, &raw, limit);
        if let Some(last) = raw.last() {
            if last.timestamp < cursor.since {
                log::warn!("Trade cursor of {} stopped moving at {}.", symbol, cursor.since);
            }
        }

        let page = raw
            .into_iter()
            .filter(|trade| trade.within(window.start, window.end))
            .collect();
        Some((Ok(page), next))
    })
}

/// Every trade of `symbol` executed in `window`, oldest first.
pub async fn fetch_trades<A>(
    api: &A,
    limiter: &RateLimiter,
    symbol: Symbol,
    window: TradeWindow,
) -> Result<Vec<Trade>, ApiError>
where
    A: Api + ?Sized,
{
    trade_pages(api, limiter, symbol, window).try_concat().await
}
