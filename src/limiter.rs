use futures_util::lock::Mutex;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Enforces a minimum spacing between consecutive requests to one transport.
///
/// Waiters are served one at a time, so the spacing also holds when several
/// trade windows of the same venue are fetched concurrently.
#[derive(Debug)]
pub struct RateLimiter {
    spacing: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(spacing: Duration) -> Self {
        RateLimiter {
            spacing,
            last: Mutex::new(None),
        }
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Suspend until at least `spacing` has passed since the previous call
    /// returned. The first call returns immediately.
    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let ready = previous + self.spacing;
            if ready > Instant::now() {
                log::trace!("Rate limited, waiting {:?}.", ready - Instant::now());
                sleep_until(ready).await;
            }
        }
        *last = Some(Instant::now());
    }
}
