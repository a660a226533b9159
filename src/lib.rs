#![deny(unused_must_use)]
#![deny(unsafe_code)]
#![allow(clippy::new_without_default)]

pub mod apis;
mod asset;
mod candle;
mod error;
pub mod export;
pub mod fetch;
mod limiter;
mod market;
mod pipeline;
mod profile;
mod runner;
mod trade;

pub use asset::*;
pub use candle::*;
pub use error::*;
pub use limiter::*;
pub use market::*;
pub use pipeline::*;
pub use profile::*;
pub use runner::*;
pub use trade::*;

use apis::Api;
use export::{Batch, Export};
use std::{fmt::Display, str::FromStr};

pub struct Footprint {
    /// The coin pair to look up on every venue.
    pub coin: CoinPair,
    pub settings: Settings,
}

impl Default for Footprint {
    fn default() -> Self {
        Footprint {
            coin: CoinPair::new("BTC", "USDT"),
            settings: Settings::default(),
        }
    }
}

impl Footprint {
    /// The defaults, overridden by `FOOTPRINT_COIN`, `FOOTPRINT_INTERVAL`,
    /// `FOOTPRINT_CANDLES`, `FOOTPRINT_BINS` and `FOOTPRINT_CONCURRENCY`.
    pub fn from_env() -> Result<Self, Error> {
        let mut footprint = Footprint::default();
        if let Some(coin) = env_var("FOOTPRINT_COIN")? {
            footprint.coin = coin;
        }
        if let Some(interval) = env_var("FOOTPRINT_INTERVAL")? {
            footprint.settings.interval = interval;
        }
        if let Some(candles) = env_var("FOOTPRINT_CANDLES")? {
            footprint.settings.candles = candles;
        }
        if let Some(bins) = env_var("FOOTPRINT_BINS")? {
            footprint.settings.bins = bins;
        }
        if let Some(concurrency) = env_var("FOOTPRINT_CONCURRENCY")? {
            footprint.settings.concurrency = concurrency;
        }
        footprint.settings.validate()?;

        Ok(footprint)
    }

    /// Resolve the coin pair on every venue, fetch and enrich every resolved
    /// symbol and export each completed pair.
    ///
    /// Only invalid settings fail the whole run; everything else is recorded
    /// per pair in the report.
    pub async fn run<E>(self, apis: &[Box<dyn Api>], export: &E) -> Result<Report, Error>
    where
        E: Export + ?Sized,
    {
        self.settings.validate()?;

        let resolved = resolve_symbols(apis, &self.coin).await;
        let runner = Runner::new(self.settings);
        let mut report = runner.run(resolved).await;

        let mut completed: Vec<(Venue, Symbol)> = report.completed().map(|(key, _)| *key).collect();
        completed.sort();
        for (venue, symbol) in completed {
            let result = match report.outcome(venue, symbol) {
                Some(Outcome::Completed(candles)) => {
                    export
                        .export(Batch {
                            run_id: runner.run_id(),
                            venue,
                            symbol,
                            interval: self.settings.interval,
                            candles,
                        })
                        .await
                }
                _ => continue,
            };
            if let Err(err) = result {
                report.fail(venue, symbol, err.into());
            }
        }

        for line in report.summary() {
            log::info!("{}", line);
        }

        Ok(report)
    }
}

fn env_var<T>(name: &str) -> Result<Option<T>, Error>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|err| Error::Config(format!("{}: {}", name, err))),
        Err(_) => Ok(None),
    }
}
