use crate::{
    apis::Api,
    pipeline::{CancelToken, Pipeline, Settings},
    EnrichedCandle, Error, RateLimiter, Symbol, Venue,
};
use futures_util::{future::join_all, TryStreamExt};
use fxhash::FxHashMap;
use uuid::Uuid;

/// Result of one (venue, symbol) pair.
#[derive(Debug)]
pub enum Outcome {
    Completed(Vec<EnrichedCandle>),
    Failed(Error),
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }
}

/// Everything a run produced, per pair.
#[derive(Debug)]
pub struct Report {
    pub run_id: Uuid,
    outcomes: FxHashMap<(Venue, Symbol), Outcome>,
    /// Venues where the coin pair could not be resolved to a symbol.
    skipped: Vec<(Venue, Error)>,
}

impl Report {
    pub fn new(run_id: Uuid) -> Self {
        Report {
            run_id,
            outcomes: FxHashMap::default(),
            skipped: Vec::new(),
        }
    }

    pub fn outcome(&self, venue: Venue, symbol: Symbol) -> Option<&Outcome> {
        self.outcomes.get(&(venue, symbol))
    }

    /// All pairs, sorted by venue and symbol.
    pub fn outcomes(&self) -> Vec<(&(Venue, Symbol), &Outcome)> {
        let mut outcomes: Vec<_> = self.outcomes.iter().collect();
        outcomes.sort_by_key(|(key, _)| **key);
        outcomes
    }

    pub fn completed(&self) -> impl Iterator<Item = (&(Venue, Symbol), &Vec<EnrichedCandle>)> {
        self.outcomes.iter().filter_map(|(key, outcome)| match outcome {
            Outcome::Completed(candles) => Some((key, candles)),
            Outcome::Failed(_) => None,
        })
    }

    pub fn skipped(&self) -> &[(Venue, Error)] {
        &self.skipped
    }

    /// Replace the outcome of a pair with a failure, discarding its candles.
    pub fn fail(&mut self, venue: Venue, symbol: Symbol, err: Error) {
        log::error!("{} on {} failed: {}", symbol, venue, err);
        self.outcomes.insert((venue, symbol), Outcome::Failed(err));
    }

    /// One line per pair and per skipped venue.
    pub fn summary(&self) -> Vec<String> {
        let pairs = self.outcomes().into_iter().map(|((venue, symbol), outcome)| match outcome {
            Outcome::Completed(candles) => {
                format!("{} {}: {} records", venue, symbol, candles.len())
            }
            Outcome::Failed(err) => format!("{} {}: failed, {}", venue, symbol, err),
        });
        let skipped = self
            .skipped
            .iter()
            .map(|(venue, err)| format!("{}: skipped, {}", venue, err));

        pairs.chain(skipped).collect()
    }
}

/// Runs one pipeline per resolved pair, all concurrently.
pub struct Runner {
    run_id: Uuid,
    settings: Settings,
    cancel: CancelToken,
}

impl Runner {
    pub fn new(settings: Settings) -> Self {
        Runner {
            run_id: Uuid::new_v4(),
            settings,
            cancel: CancelToken::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Cancels every pipeline of this runner before its next trade window.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Fetch and enrich every resolved pair. Failures are recorded per pair
    /// and never affect the other pairs.
    pub async fn run(&self, resolved: Vec<(&dyn Api, Result<Symbol, Error>)>) -> Report {
        let mut report = Report::new(self.run_id);
        log::info!("Starting run {} with {:?}.", self.run_id, self.settings);

        // One limiter per transport, shared by all requests to it.
        let mut limiters: FxHashMap<Venue, RateLimiter> = FxHashMap::default();
        let mut pairs = Vec::new();
        for (api, symbol) in resolved {
            match symbol {
                Ok(symbol) => {
                    limiters
                        .entry(api.venue())
                        .or_insert_with(|| RateLimiter::new(api.rate_limit()));
                    pairs.push((api, symbol));
                }
                Err(err) => {
                    log::warn!("Skipping {}: {}", api.venue(), err);
                    report.skipped.push((api.venue(), err));
                }
            }
        }

        let runs = pairs.iter().filter_map(|(api, symbol)| {
            limiters
                .get(&api.venue())
                .map(|limiter| self.run_pair(*api, limiter, *symbol))
        });
        for ((venue, symbol), outcome) in join_all(runs).await {
            report.outcomes.insert((venue, symbol), outcome);
        }

        report
    }

    async fn run_pair(
        &self,
        api: &dyn Api,
        limiter: &RateLimiter,
        symbol: Symbol,
    ) -> ((Venue, Symbol), Outcome) {
        let venue = api.venue();
        log::info!("Fetching {} on {}.", symbol, venue);

        let result: Result<Vec<EnrichedCandle>, Error> =
            match Pipeline::new(api, limiter, symbol, self.settings, self.cancel.clone()) {
                Ok(pipeline) => pipeline.run().try_collect().await,
                Err(err) => Err(err),
            };

        let outcome = match result {
            Ok(candles) => {
                log::info!("Finished {} on {}, {} candles.", symbol, venue, candles.len());
                Outcome::Completed(candles)
            }
            Err(err) => {
                if err.is_rate_limited() {
                    log::error!("{} rate limited {}, consider enabling retries.", venue, symbol);
                }
                log::error!("{} on {} failed: {}", symbol, venue, err);
                Outcome::Failed(err)
            }
        };

        ((venue, symbol), outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{apis::Mock, Candle, Interval, Side, Trade};
    use std::time::Duration;
    use tokio::time::Instant;

    const MINUTE: i64 = 60_000;

    fn settings() -> Settings {
        Settings {
            interval: Interval::M1,
            candles: 5,
            bins: 3,
            concurrency: 1,
        }
    }

    // Five one-minute candles with one trade each.
    fn mock(venue: &str) -> Mock {
        let candles = (0..5)
            .map(|i| Candle {
                timestamp: i * MINUTE,
                open: 10.0,
                high: 12.0,
                low: 9.0,
                close: 11.0,
                volume: 1.0,
            })
            .collect();
        let trades = (0..5)
            .map(|i| Trade {
                timestamp: i * MINUTE + 1,
                price: 10.0,
                amount: 1.0,
                side: Side::Buy,
            })
            .collect();
        Mock::new(venue)
            .with_now(5 * MINUTE)
            .with_candles(candles)
            .with_trades(trades)
    }

    #[tokio::test]
    async fn failing_pair_does_not_affect_others() {
        let healthy = mock("healthy");
        let flaky = mock("flaky").fail_trade_request(3);
        let runner = Runner::new(settings());

        let report = runner
            .run(vec![
                (&healthy as &dyn Api, Ok(Symbol::perp("X"))),
                (&flaky as &dyn Api, Ok(Symbol::perp("X"))),
            ])
            .await;

        match report.outcome(Venue::new("healthy"), Symbol::perp("X")) {
            Some(Outcome::Completed(candles)) => {
                assert_eq!(candles.len(), 5);
                assert!(candles.iter().all(|c| c.record().ask_volume_sum == 1.0));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(matches!(
            report.outcome(Venue::new("flaky"), Symbol::perp("X")),
            Some(Outcome::Failed(Error::Api(_)))
        ));
        assert_eq!(report.completed().count(), 1);
        assert_eq!(report.run_id, runner.run_id());
    }

    #[tokio::test]
    async fn unresolved_venues_are_skipped() {
        let healthy = mock("healthy");
        let missing = mock("missing");
        let runner = Runner::new(settings());

        let report = runner
            .run(vec![
                (&healthy as &dyn Api, Ok(Symbol::perp("X"))),
                (
                    &missing as &dyn Api,
                    Err(Error::SymbolNotFound {
                        venue: Venue::new("missing"),
                        coin: "BTC/USDT".to_owned(),
                    }),
                ),
            ])
            .await;

        assert_eq!(report.skipped().len(), 1);
        assert!(missing.requests().is_empty());
        assert_eq!(
            report.summary(),
            vec![
                "healthy X: 5 records".to_owned(),
                "missing: skipped, No perpetual swap for BTC/USDT on missing.".to_owned(),
            ]
        );
    }

    #[tokio::test]
    async fn cancelled_runner_fails_every_pair() {
        let first = mock("first");
        let second = mock("second");
        let runner = Runner::new(settings());
        runner.cancel_token().cancel();

        let report = runner
            .run(vec![
                (&first as &dyn Api, Ok(Symbol::perp("X"))),
                (&second as &dyn Api, Ok(Symbol::perp("Y"))),
            ])
            .await;

        assert_eq!(report.completed().count(), 0);
        for (_, outcome) in report.outcomes() {
            assert!(matches!(outcome, Outcome::Failed(Error::Cancelled)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn symbols_on_one_transport_share_its_rate_limit() {
        let shared = mock("shared").with_rate_limit(Duration::from_secs(1));
        let runner = Runner::new(settings());
        let start = Instant::now();

        let report = runner
            .run(vec![
                (&shared as &dyn Api, Ok(Symbol::perp("X"))),
                (&shared as &dyn Api, Ok(Symbol::perp("Y"))),
            ])
            .await;

        assert_eq!(report.completed().count(), 2);
        // One candle request and five trade requests per symbol.
        assert_eq!(shared.requests().len(), 12);
        assert!(start.elapsed() >= Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_follows_transport_rate_limit() {
        let slow = mock("slow").with_rate_limit(Duration::from_millis(500));
        let runner = Runner::new(settings());
        let start = Instant::now();

        let report = runner.run(vec![(&slow as &dyn Api, Ok(Symbol::perp("X")))]).await;

        assert_eq!(report.completed().count(), 1);
        assert!(start.elapsed() >= Duration::from_millis(2500));
    }

    #[test]
    fn fail_replaces_completed() {
        let mut report = Report::new(Uuid::new_v4());
        report
            .outcomes
            .insert((Venue::new("v"), Symbol::perp("X")), Outcome::Completed(Vec::new()));

        report.fail(Venue::new("v"), Symbol::perp("X"), Error::Cancelled);

        assert!(!report.outcome(Venue::new("v"), Symbol::perp("X")).unwrap().is_completed());
    }
}
