//! Bittrex exchange implementation (REST API v1.1)

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::core::types::decimal_from_f64;
use crate::core::{
    Balances, Error, Exchange, ExchangeConfig, OrderDetails, OrderId, OrderRequest, OrderStatus,
    OrderType, Pair, Result, Side, Ticker, Trade,
};
use crate::exchanges::credentials::{self, Credentials};
use crate::signer::{Digest, HmacSigner, Nonce};

const BASE_URL: &str = "https://bittrex.com/api/v1.1";

/// Every Bittrex response is wrapped in this envelope
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    message: String,
    result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Market {
    market_name: String,
    min_trade_size: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MarketSummary {
    // null on illiquid markets
    high: Option<f64>,
    low: Option<f64>,
    volume: Option<f64>,
    last: Option<f64>,
    bid: Option<f64>,
    ask: Option<f64>,
    time_stamp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HistoryEntry {
    quantity: f64,
    price: f64,
    order_type: String,
    time_stamp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawBalance {
    currency: String,
    #[serde(default)]
    balance: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Placed {
    uuid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawOrderRef {
    order_uuid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawOrder {
    exchange: String,
    #[serde(rename = "Type")]
    order_type: String,
    quantity: f64,
    quantity_remaining: f64,
    limit: f64,
    opened: String,
    is_open: bool,
    cancel_initiated: bool,
}

/// Bittrex exchange adapter
pub struct Bittrex {
    name: String,
    base_url: String,
    client: reqwest::Client,
    credentials: Credentials,
    nonce: Nonce,
    markets: RwLock<Option<Arc<HashMap<String, Market>>>>,
}

impl Bittrex {
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            name: "Bittrex".to_string(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            client,
            credentials: Credentials::new(Digest::Sha512),
            nonce: Nonce::new(),
            markets: RwLock::new(None),
        })
    }

    async fn send<T: DeserializeOwned>(&self, uri: &str, apisign: Option<String>) -> Result<Option<T>> {
        let mut req = self.client.get(uri);
        if let Some(signature) = apisign {
            req = req.header("apisign", signature);
        }
        debug!("GET request {}", redact(uri));
        let resp = req.send().await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Envelope<T> = serde_json::from_str(&body)?;
        if !envelope.success {
            return Err(Error::Exchange(envelope.message));
        }
        Ok(envelope.result)
    }

    async fn public<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T> {
        let uri = build_uri(&self.base_url, path, params.iter().cloned());
        self.send(&uri, None).await?.ok_or_else(|| empty_result(path))
    }

    /// Signed GET; `apikey` and `nonce` join the query and the whole URI is signed
    async fn signed<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<Option<T>> {
        let signer = self.credentials.signer()?;
        let uri = signed_uri(&self.base_url, path, params, &signer, self.nonce.next());
        let signature = signer.sign(uri.as_bytes());
        self.send(&uri, Some(signature)).await
    }

    async fn signed_required<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T> {
        self.signed(path, params).await?.ok_or_else(|| empty_result(path))
    }

    async fn markets(&self) -> Result<Arc<HashMap<String, Market>>> {
        let cached = self.markets.read().clone();
        if let Some(markets) = cached {
            return Ok(markets);
        }
        let raw: Vec<Market> = self.public("/public/getmarkets", &[]).await?;
        let markets: Arc<HashMap<_, _>> =
            Arc::new(raw.into_iter().map(|m| (m.market_name.clone(), m)).collect());
        *self.markets.write() = Some(markets.clone());
        Ok(markets)
    }

    /// Listed market for a pair
    async fn market(&self, pair: &Pair) -> Result<Market> {
        self.markets()
            .await?
            .get(&to_market(pair))
            .cloned()
            .ok_or_else(|| Error::InvalidPair {
                base: pair.base.clone(),
                quote: pair.quote.clone(),
            })
    }

    async fn fetch_balances(&self) -> Result<Balances> {
        let raw: Vec<RawBalance> = self.signed_required("/account/getbalances", &[]).await?;
        raw.into_iter()
            .map(|b| -> Result<(String, Decimal)> {
                let amount = decimal_from_f64("Balance", b.balance.unwrap_or_default())?;
                Ok((b.currency.to_uppercase(), amount))
            })
            .collect()
    }
}

/// `QUOTE-BASE`, e.g. BTC-LTC for LTC priced in BTC
fn to_market(pair: &Pair) -> String {
    format!("{}-{}", pair.quote, pair.base)
}

fn parse_market(name: &str) -> Option<Pair> {
    name.split_once('-')
        .filter(|(quote, base)| !quote.is_empty() && !base.is_empty())
        .map(|(quote, base)| Pair::new(base, quote))
}

/// Query parameters are sorted by key
fn build_uri<'a>(base_url: &str, path: &str, params: impl Iterator<Item = (&'a str, String)>) -> String {
    let sorted: BTreeMap<&str, String> = params.collect();
    if sorted.is_empty() {
        return format!("{}{}", base_url, path);
    }
    let query = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}{}?{}", base_url, path, query)
}

fn signed_uri(
    base_url: &str,
    path: &str,
    params: &[(&str, String)],
    signer: &HmacSigner,
    nonce: u64,
) -> String {
    let auth = [
        ("apikey", signer.key_id().to_string()),
        ("nonce", nonce.to_string()),
    ];
    build_uri(base_url, path, params.iter().cloned().chain(auth))
}

/// Strips the API key from logged URLs
fn redact(uri: &str) -> String {
    match uri.split_once("apikey=") {
        Some((head, tail)) => {
            let rest = tail.find('&').map(|i| &tail[i..]).unwrap_or("");
            format!("{}apikey=<redacted>{}", head, rest)
        }
        None => uri.to_string(),
    }
}

/// A summary field Bittrex may leave null
fn required(field: &str, value: Option<f64>) -> Result<Decimal> {
    let value = value.ok_or_else(|| Error::Parse(format!("{}: missing", field)))?;
    decimal_from_f64(field, value)
}

fn empty_result(path: &str) -> Error {
    Error::Exchange(format!("{}: empty result", path))
}

/// Bittrex stamps carry no zone; they are UTC
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Parse(format!("timestamp {:?}: {}", raw, e)))
}

/// `LIMIT_BUY` -> (limit, buy)
fn parse_order_kind(raw: &str) -> Result<(OrderType, Side)> {
    let (kind, side) = raw
        .split_once('_')
        .ok_or_else(|| Error::Parse(format!("order type {:?}", raw)))?;
    Ok((kind.parse::<OrderType>()?, side.parse::<Side>()?))
}

#[async_trait]
impl Exchange for Bittrex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn authenticate(&self, api_key: &str, api_secret: &str) -> Result<()> {
        self.credentials.stage(api_key, api_secret)?;
        credentials::validate(&self.credentials, &self.name, self.fetch_balances()).await
    }

    fn unauthenticate(&self) {
        self.credentials.clear();
    }

    fn is_authenticated(&self) -> bool {
        self.credentials.is_authenticated()
    }

    async fn pairs(&self) -> Result<Vec<Pair>> {
        let mut pairs: Vec<Pair> = self
            .markets()
            .await?
            .keys()
            .filter_map(|name| parse_market(name))
            .collect();
        pairs.sort();
        Ok(pairs)
    }

    async fn ticker(&self, pair: &Pair) -> Result<Ticker> {
        let market = self.market(pair).await?;
        let summaries: Vec<MarketSummary> = self
            .public(
                "/public/getmarketsummary",
                &[("market", market.market_name.clone())],
            )
            .await?;
        let summary = summaries
            .into_iter()
            .next()
            .ok_or_else(|| empty_result("/public/getmarketsummary"))?;

        Ok(Ticker {
            ask: required("Ask", summary.ask)?,
            bid: required("Bid", summary.bid)?,
            high: required("High", summary.high)?,
            last: required("Last", summary.last)?,
            low: required("Low", summary.low)?,
            volume: required("Volume", summary.volume)?,
            timestamp: parse_timestamp(&summary.time_stamp)?,
        })
    }

    async fn trades(&self, pair: &Pair) -> Result<Vec<Trade>> {
        let market = self.market(pair).await?;
        let history: Vec<HistoryEntry> = self
            .public("/public/getmarkethistory", &[("market", market.market_name)])
            .await?;

        let mut trades = history
            .into_iter()
            .map(|t| -> Result<Trade> {
                Ok(Trade {
                    quantity: decimal_from_f64("Quantity", t.quantity)?,
                    price: decimal_from_f64("Price", t.price)?,
                    side: t.order_type.parse::<Side>()?,
                    timestamp: parse_timestamp(&t.time_stamp)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        trades.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(trades)
    }

    async fn balances(&self) -> Result<Balances> {
        self.credentials.require()?;
        self.fetch_balances().await
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderId> {
        self.credentials.require()?;
        order.validate()?;
        let price = match (order.order_type, order.price) {
            (OrderType::Limit, Some(price)) => price,
            _ => {
                return Err(Error::InvalidOrder(
                    "Only limit orders are allowed".to_string(),
                ));
            }
        };

        let market = self.market(&order.pair).await?;
        let min = decimal_from_f64("MinTradeSize", market.min_trade_size)?;
        if order.amount < min {
            return Err(Error::InvalidOrder(format!("Minimum order size is {}", min)));
        }

        let endpoint = match order.side {
            Side::Buy => "/market/buylimit",
            Side::Sell => "/market/selllimit",
        };
        info!(
            "Placing order: {} {} {} @ {}",
            order.side, order.amount, order.pair, price
        );
        let placed: Placed = self
            .signed_required(
                endpoint,
                &[
                    ("market", market.market_name),
                    ("quantity", order.amount.to_string()),
                    ("rate", price.to_string()),
                ],
            )
            .await?;
        Ok(OrderId::new(placed.uuid))
    }

    async fn cancel_order(&self, order_id: &OrderId) -> Result<()> {
        self.credentials.require()?;
        debug!("Cancelling order: {}", order_id);
        let _: Option<serde_json::Value> = self
            .signed("/market/cancel", &[("uuid", order_id.to_string())])
            .await?;
        Ok(())
    }

    async fn order_details(&self, order_id: &OrderId) -> Result<OrderDetails> {
        self.credentials.require()?;
        let raw: RawOrder = self
            .signed_required("/account/getorder", &[("uuid", order_id.to_string())])
            .await?;

        let pair = parse_market(&raw.exchange)
            .ok_or_else(|| Error::Parse(format!("market name {:?}", raw.exchange)))?;
        let (order_type, side) = parse_order_kind(&raw.order_type)?;

        Ok(OrderDetails {
            pair,
            order_type,
            side,
            quantity: decimal_from_f64("Quantity", raw.quantity)?,
            remaining: decimal_from_f64("QuantityRemaining", raw.quantity_remaining)?,
            price: decimal_from_f64("Limit", raw.limit)?,
            opened_at: parse_timestamp(&raw.opened)?,
            status: OrderStatus::from_flags(raw.is_open, raw.cancel_initiated),
        })
    }

    async fn active_orders(&self) -> Result<Vec<OrderId>> {
        self.credentials.require()?;
        let orders: Vec<RawOrderRef> = self.signed_required("/market/getopenorders", &[]).await?;
        Ok(orders.into_iter().map(|o| OrderId::new(o.order_uuid)).collect())
    }

    async fn past_orders(&self) -> Result<Vec<OrderId>> {
        self.credentials.require()?;
        let orders: Vec<RawOrderRef> = self.signed_required("/account/getorderhistory", &[]).await?;
        Ok(orders.into_iter().map(|o| OrderId::new(o.order_uuid)).collect())
    }
}
