use crate::{apis::Api, asset::intern, Asset, Error};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Identifies one exchange transport, e.g. "binance".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Venue(&'static str);

impl Venue {
    pub fn new<R: AsRef<str>>(name: R) -> Self {
        Venue(intern(name.as_ref().trim().to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MarketType {
    Spot,
    /// Dated delivery contract.
    Future,
    /// Perpetual swap.
    Swap,
}

/// A venue-native trading symbol, e.g. "BTCUSDT" on Binance USDⓈ-M.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Symbol {
    name: &'static str,
    market_type: MarketType,
}

impl Symbol {
    pub fn new<R: AsRef<str>>(name: R, market_type: MarketType) -> Self {
        Symbol {
            name: intern(name),
            market_type,
        }
    }

    pub fn perp<R: AsRef<str>>(name: R) -> Self {
        Symbol::new(name, MarketType::Swap)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn market_type(&self) -> MarketType {
        self.market_type
    }

    /// The symbol with path separators replaced, usable as part of a file name.
    pub fn file_safe(&self) -> String {
        self.name.replace('/', "_").replace(':', "_")
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A coin pair as requested by the user, "BASE/QUOTE" with an optional
/// ":SETTLE" suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoinPair {
    pub base: Asset,
    pub quote: Asset,
    pub settle: Option<Asset>,
}

impl CoinPair {
    pub fn new<R: AsRef<str>>(base: R, quote: R) -> Self {
        CoinPair {
            base: Asset::new(base),
            quote: Asset::new(quote),
            settle: None,
        }
    }
}

impl FromStr for CoinPair {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::Config(format!("Invalid coin pair {:?}, expected BASE/QUOTE.", s));
        let (pair, settle) = match s.split_once(':') {
            Some((pair, settle)) => (pair, Some(settle)),
            None => (s, None),
        };
        let (base, quote) = pair.split_once('/').ok_or_else(invalid)?;
        if base.trim().is_empty() || quote.trim().is_empty() {
            return Err(invalid());
        }
        let settle = match settle {
            Some(settle) if settle.trim().is_empty() => return Err(invalid()),
            Some(settle) => Some(Asset::new(settle)),
            None => None,
        };

        Ok(CoinPair {
            settle,
            ..CoinPair::new(base, quote)
        })
    }
}

impl fmt::Display for CoinPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)?;
        if let Some(settle) = self.settle {
            write!(f, ":{}", settle)?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MarketInfo {
    pub symbol: Symbol,
    pub base: Asset,
    pub quote: Asset,
    pub settle: Asset,
    pub active: bool,
}

impl MarketInfo {
    fn matches(&self, coin: &CoinPair) -> bool {
        self.base == coin.base
            && self.quote == coin.quote
            && coin.settle.map_or(true, |settle| settle == self.settle)
    }
}

/// All markets listed by one venue, in listing order.
#[derive(Debug, Clone, Default)]
pub struct Markets {
    pub(crate) markets: Vec<MarketInfo>,
}

impl Markets {
    pub fn new(markets: Vec<MarketInfo>) -> Self {
        Markets { markets }
    }

    /// The first active perpetual swap trading the coin pair.
    pub fn perpetual(&self, coin: &CoinPair) -> Option<&MarketInfo> {
        self.markets.iter().find(|market| {
            market.active && market.symbol.market_type() == MarketType::Swap && market.matches(coin)
        })
    }
}

/// Find the perpetual swap symbol of a coin pair on each venue.
///
/// Venues are queried concurrently. Every venue yields an entry, in input
/// order: either its symbol or the reason it could not be resolved.
pub async fn resolve_symbols<'a>(
    apis: &'a [Box<dyn Api>],
    coin: &CoinPair,
) -> Vec<(&'a dyn Api, Result<Symbol, Error>)> {
    let lookups = apis.iter().map(|api| async move {
        let api: &dyn Api = api.as_ref();
        let symbol = match api.markets().await {
            Ok(markets) => match Markets::new(markets).perpetual(coin) {
                Some(market) => {
                    log::info!("Resolved {} on {} to {}.", coin, api.venue(), market.symbol);
                    Ok(market.symbol)
                }
                None => {
                    log::warn!("No perpetual swap for {} on {}.", coin, api.venue());
                    Err(Error::SymbolNotFound {
                        venue: api.venue(),
                        coin: coin.to_string(),
                    })
                }
            },
            Err(err) => {
                log::error!("Could not load markets of {}: {}", api.venue(), err);
                Err(Error::Api(err))
            }
        };
        (api, symbol)
    });

    join_all(lookups).await
}
