use crate::{
    apis::{Api, ApiError},
    Asset, Candle, Interval, MarketInfo, MarketType, Side, Symbol, Trade, Venue,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use std::{env, time::Duration};

const BASE_URL_USD_MARGINED: &str = "https://fapi.binance.com";
const BASE_URL_COIN_MARGINED: &str = "https://dapi.binance.com";

/// The Binance futures families. Both share one REST dialect and differ only
/// in host, path prefix and symbol naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinanceMarket {
    /// USDⓈ-M futures, e.g. `BTCUSDT`.
    UsdMargined,
    /// COIN-M futures, e.g. `BTCUSD_PERP`.
    CoinMargined,
}

impl BinanceMarket {
    fn venue(&self) -> &'static str {
        match self {
            BinanceMarket::UsdMargined => "binance",
            BinanceMarket::CoinMargined => "binancecoinm",
        }
    }

    fn base_url(&self) -> &'static str {
        match self {
            BinanceMarket::UsdMargined => BASE_URL_USD_MARGINED,
            BinanceMarket::CoinMargined => BASE_URL_COIN_MARGINED,
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            BinanceMarket::UsdMargined => "/fapi/v1",
            BinanceMarket::CoinMargined => "/dapi/v1",
        }
    }
}

pub struct Binance {
    client: Client,
    market: BinanceMarket,
    base_url: String,
}

impl Binance {
    pub const MAX_CANDLE_BATCH: usize = 1000;
    pub const MAX_TRADE_BATCH: usize = 1000;
    /// Request weight budget per IP and minute.
    pub const WEIGHT_PER_MINUTE: u64 = 2400;
    /// Weight of one `aggTrades` call, the most expensive request made.
    pub const AGG_TRADES_WEIGHT: u64 = 20;
    pub const RATE_LIMIT: Duration =
        Duration::from_millis(60_000 * Self::AGG_TRADES_WEIGHT / Self::WEIGHT_PER_MINUTE);
    /// `aggTrades` rejects `endTime - startTime` of an hour or more.
    const AGG_TRADES_SPAN_MS: i64 = 60 * 60 * 1000;

    pub fn new(market: BinanceMarket) -> Result<Self, ApiError> {
        Self::with_base_url(market, market.base_url())
    }

    /// Talk to another host, e.g. a testnet or a local proxy.
    pub fn with_base_url<R: Into<String>>(
        market: BinanceMarket,
        base_url: R,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| ApiError::Network(err.to_string()))?;

        Ok(Binance {
            client,
            market,
            base_url: base_url.into(),
        })
    }

    /// Picks the futures family from `BINANCE_ENDPOINT` (`usdm` or `coinm`,
    /// default `usdm`) and the host from `BINANCE_BASE_URL` if set.
    pub fn from_env() -> Result<Self, ApiError> {
        let market = match env::var("BINANCE_ENDPOINT") {
            Ok(endpoint) => parse_market(&endpoint)?,
            Err(_) => BinanceMarket::UsdMargined,
        };

        match env::var("BINANCE_BASE_URL") {
            Ok(base_url) => Self::with_base_url(market, base_url),
            Err(_) => Self::new(market),
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let url = format!("{}{}/{}", self.base_url, self.market.prefix(), endpoint);
        log::trace!("GET {} {:?}", url, query);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|err| ApiError::Network(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ApiError::Network(err.to_string()))?;

        if !status.is_success() {
            return Err(parse_error(status, body));
        }

        serde_json::from_str(&body).map_err(|err| ApiError::Decode(err.to_string()))
    }
}

fn parse_market(endpoint: &str) -> Result<BinanceMarket, ApiError> {
    match endpoint.to_ascii_lowercase().as_str() {
        "usdm" | "fapi" => Ok(BinanceMarket::UsdMargined),
        "coinm" | "dapi" => Ok(BinanceMarket::CoinMargined),
        other => Err(ApiError::Decode(format!(
            "Invalid Binance endpoint {:?}, expected usdm or coinm.",
            other
        ))),
    }
}

/// Error payload, e.g. `{ "code": -1121, "msg": "Invalid symbol." }`.
#[derive(Debug, Deserialize)]
struct BinanceApiError {
    code: i64,
    msg: String,
}

fn parse_error(status: StatusCode, body: String) -> ApiError {
    // 418 is the ban that follows ignoring 429s.
    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
        return ApiError::RateLimited(status.as_u16());
    }
    match serde_json::from_str::<BinanceApiError>(&body) {
        Ok(err) => ApiError::Api {
            code: err.code,
            msg: err.msg,
        },
        Err(_) => ApiError::Http {
            status: status.as_u16(),
            body,
        },
    }
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    contract_type: String,
    // USDⓈ-M reports `status`, COIN-M reports `contractStatus`.
    status: Option<String>,
    contract_status: Option<String>,
    base_asset: String,
    quote_asset: String,
    margin_asset: String,
}

impl From<SymbolInfo> for MarketInfo {
    fn from(info: SymbolInfo) -> Self {
        let market_type = match info.contract_type.as_str() {
            "PERPETUAL" => MarketType::Swap,
            _ => MarketType::Future,
        };
        let active = info
            .status
            .as_deref()
            .or_else(|| info.contract_status.as_deref())
            == Some("TRADING");

        MarketInfo {
            symbol: Symbol::new(&info.symbol, market_type),
            base: Asset::new(&info.base_asset),
            quote: Asset::new(&info.quote_asset),
            settle: Asset::new(&info.margin_asset),
            active,
        }
    }
}

/// `[open_time, open, high, low, close, volume, close_time, quote_volume,
/// trade_count, taker_buy_volume, taker_buy_quote_volume, ignore]`
type RawKline = (
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    u64,
    String,
    String,
    String,
);

fn parse_f64(field: &str, value: &str) -> Result<f64, ApiError> {
    value
        .parse()
        .map_err(|err| ApiError::Decode(format!("{} {:?}: {}", field, value, err)))
}

fn parse_kline(raw: RawKline) -> Result<Candle, ApiError> {
    Ok(Candle {
        timestamp: raw.0,
        open: parse_f64("open", &raw.1)?,
        high: parse_f64("high", &raw.2)?,
        low: parse_f64("low", &raw.3)?,
        close: parse_f64("close", &raw.4)?,
        volume: parse_f64("volume", &raw.5)?,
    })
}

#[derive(Debug, Deserialize)]
struct AggTrade {
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "T")]
    trade_time: i64,
    /// The buyer was the maker, so the seller was the taker.
    #[serde(rename = "m")]
    is_buyer_maker: bool,
}

impl TryFrom<AggTrade> for Trade {
    type Error = ApiError;

    fn try_from(raw: AggTrade) -> Result<Self, Self::Error> {
        Ok(Trade {
            timestamp: raw.trade_time,
            price: parse_f64("price", &raw.price)?,
            amount: parse_f64("quantity", &raw.quantity)?,
            side: if raw.is_buyer_maker {
                Side::Sell
            } else {
                Side::Buy
            },
        })
    }
}

#[async_trait]
impl Api for Binance {
    fn venue(&self) -> Venue {
        Venue::new(self.market.venue())
    }

    fn max_candle_batch(&self, _market_type: MarketType) -> usize {
        Self::MAX_CANDLE_BATCH
    }

    fn max_trade_batch(&self) -> usize {
        Self::MAX_TRADE_BATCH
    }

    fn rate_limit(&self) -> Duration {
        Self::RATE_LIMIT
    }

    async fn markets(&self) -> Result<Vec<MarketInfo>, ApiError> {
        let info: ExchangeInfo = self.get("exchangeInfo", &[]).await?;
        Ok(info.symbols.into_iter().map(MarketInfo::from).collect())
    }

    async fn fetch_candles(
        &self,
        symbol: Symbol,
        interval: Interval,
        since: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ApiError> {
        let limit = limit.min(Self::MAX_CANDLE_BATCH);
        let raw: Vec<RawKline> = self
            .get(
                "klines",
                &[
                    ("symbol", symbol.name().to_owned()),
                    ("interval", interval.as_str().to_owned()),
                    ("startTime", since.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        raw.into_iter().map(parse_kline).collect()
    }

    async fn fetch_trades(
        &self,
        symbol: Symbol,
        since: i64,
        until: i64,
        limit: usize,
    ) -> Result<Vec<Trade>, ApiError> {
        let limit = limit.min(Self::MAX_TRADE_BATCH);
        let mut trades = Vec::new();
        let mut since = since;
        let mut first = true;

        // Ranges longer than an hour are walked in hour sized spans, so a
        // short result still means `[since, until)` is exhausted.
        while since < until && trades.len() < limit {
            if !first {
                tokio::time::sleep(Self::RATE_LIMIT).await;
            }
            first = false;
            let (start_time, end_time) = agg_trades_span(since, until);
            let requested = limit - trades.len();
            let raw: Vec<AggTrade> = self
                .get(
                    "aggTrades",
                    &[
                        ("symbol", symbol.name().to_owned()),
                        ("startTime", start_time.to_string()),
                        ("endTime", end_time.to_string()),
                        ("limit", requested.to_string()),
                    ],
                )
                .await?;

            let exhausted = raw.len() < requested;
            for trade in raw {
                trades.push(Trade::try_from(trade)?);
            }
            if !exhausted {
                break;
            }
            since = end_time + 1;
        }

        Ok(trades)
    }
}

/// `(startTime, endTime)` of one `aggTrades` request, `endTime` inclusive.
fn agg_trades_span(since: i64, until: i64) -> (i64, i64) {
    (since, until.min(since + Binance::AGG_TRADES_SPAN_MS) - 1)
}
