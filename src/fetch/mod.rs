//! Cursor based pagination over a transport.
//!
//! Each fetcher is a stream of pages built with `unfold` around an immutable
//! [`FetchCursor`]. Whether and where to continue after a page is decided by a
//! pure function, so the stop rules can be tested without any I/O.

mod candles;
mod trades;

pub use candles::*;
pub use trades::*;

/// Lower bound (inclusive, in milliseconds) of the next page request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchCursor {
    pub since: i64,
}

impl FetchCursor {
    pub fn new(since: i64) -> Self {
        FetchCursor { since }
    }

    /// The cursor following a page whose last item has `timestamp`.
    ///
    /// `None` if that would not move forward, which only happens when the
    /// transport ignored the cursor.
    pub fn after(self, timestamp: i64) -> Option<Self> {
        if timestamp < self.since {
            None
        } else {
            Some(FetchCursor::new(timestamp + 1))
        }
    }
}
