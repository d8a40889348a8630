//! Bitfinex exchange implementation (REST API v1)

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::types::parse_decimal;
use crate::core::{
    Balances, Error, Exchange, ExchangeConfig, OrderDetails, OrderId, OrderRequest, OrderStatus,
    OrderType, Pair, Result, Side, Ticker, Trade,
};
use crate::exchanges::credentials::{self, Credentials};
use crate::signer::{Digest, Nonce};

const BASE_URL: &str = "https://api.bitfinex.com/v1";
const TRADES_LIMIT: u32 = 50;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SymbolDetails {
    pair: String,
    minimum_order_size: String,
    maximum_order_size: String,
}

#[derive(Debug, Deserialize)]
struct RawTicker {
    bid: String,
    ask: String,
    last_price: String,
    low: String,
    high: String,
    volume: String,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    timestamp: i64,
    price: String,
    amount: String,
    #[serde(rename = "type")]
    side: String,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    #[serde(rename = "type")]
    wallet: String,
    currency: String,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct RawOrderId {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RawResult {
    #[serde(default)]
    result: String,
}

/// Read/write flags of one API key scope, as reported by `/key_info`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct KeyPermission {
    pub read: bool,
    pub write: bool,
}

#[derive(Debug, Deserialize)]
struct RawOrder {
    symbol: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    price: String,
    timestamp: String,
    is_live: bool,
    is_cancelled: bool,
    original_amount: String,
    remaining_amount: String,
}

/// Bitfinex exchange adapter
pub struct Bitfinex {
    name: String,
    base_url: String,
    v2_url: String,
    client: reqwest::Client,
    credentials: Credentials,
    nonce: Nonce,
    symbols: RwLock<Option<Arc<Vec<String>>>>,
    details: RwLock<Option<Arc<HashMap<String, SymbolDetails>>>>,
}

impl Bitfinex {
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        // v2 lives next to v1 under the same host
        let v2_url = format!("{}/v2", base_url.strip_suffix("/v1").unwrap_or(&base_url));

        Ok(Self {
            name: "Bitfinex".to_string(),
            base_url,
            v2_url,
            client,
            credentials: Credentials::new(Digest::Sha384),
            nonce: Nonce::new(),
            symbols: RwLock::new(None),
            details: RwLock::new(None),
        })
    }

    async fn read<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        let body = resp.text().await?;

        if status == StatusCode::BAD_REQUEST {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.message)
                .unwrap_or(body);
            return Err(Error::Exchange(message));
        }
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T> {
        self.get_url(&format!("{}{}", self.base_url, path), params).await
    }

    async fn get_url<T: DeserializeOwned>(&self, url: &str, params: &[(&str, String)]) -> Result<T> {
        let mut req = self.client.get(url);
        if !params.is_empty() {
            req = req.query(params);
        }
        let req = req.build()?;
        debug!("GET request {}", req.url());
        let resp = self.client.execute(req).await?;
        Self::read(resp).await
    }

    /// Signed POST. `request` and `nonce` are added to the payload.
    async fn post<T: DeserializeOwned>(&self, path: &str, mut payload: Map<String, Value>) -> Result<T> {
        let signer = self.credentials.signer()?;

        payload.insert("request".to_string(), Value::String(format!("/v1{}", path)));
        payload.insert("nonce".to_string(), Value::String(self.nonce.next().to_string()));

        let body = serde_json::to_string(&payload)?;
        let encoded = BASE64.encode(body.as_bytes());
        let signature = signer.sign(encoded.as_bytes());

        let url = format!("{}{}", self.base_url, path);
        debug!("POST request {}", url);
        let resp = self
            .client
            .post(&url)
            .header("X-BFX-APIKEY", signer.key_id())
            .header("X-BFX-PAYLOAD", &encoded)
            .header("X-BFX-SIGNATURE", signature)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        Self::read(resp).await
    }

    async fn symbols(&self) -> Result<Arc<Vec<String>>> {
        let cached = self.symbols.read().clone();
        if let Some(symbols) = cached {
            return Ok(symbols);
        }
        let symbols: Arc<Vec<String>> = Arc::new(self.get("/symbols", &[]).await?);
        *self.symbols.write() = Some(symbols.clone());
        Ok(symbols)
    }

    async fn symbol_details(&self, symbol: &str) -> Result<SymbolDetails> {
        let cached = self.details.read().clone();
        let details = match cached {
            Some(details) => details,
            None => {
                let raw: Vec<SymbolDetails> = self.get("/symbols_details", &[]).await?;
                let details: Arc<HashMap<_, _>> =
                    Arc::new(raw.into_iter().map(|d| (d.pair.clone(), d)).collect());
                *self.details.write() = Some(details.clone());
                details
            }
        };
        details
            .get(symbol)
            .cloned()
            .ok_or_else(|| Error::Exchange(format!("no details for symbol {}", symbol)))
    }

    /// Exchange symbol for a listed pair
    async fn make_symbol(&self, pair: &Pair) -> Result<String> {
        let symbol = to_symbol(pair);
        if self.symbols().await?.iter().any(|s| *s == symbol) {
            Ok(symbol)
        } else {
            Err(Error::InvalidPair {
                base: pair.base.clone(),
                quote: pair.quote.clone(),
            })
        }
    }

    async fn fetch_balances(&self) -> Result<Balances> {
        let raw: Vec<RawBalance> = self.post("/balances", Map::new()).await?;

        // Only exchange wallets; margin and funding wallets are skipped.
        let mut balances = Balances::new();
        for b in raw.into_iter().filter(|b| b.wallet == "exchange") {
            let amount = parse_decimal("amount", &b.amount)?;
            if amount > Decimal::ZERO {
                balances.insert(b.currency.to_uppercase(), amount);
            }
        }
        Ok(balances)
    }

    fn order_id_payload(order_id: &OrderId) -> Result<Map<String, Value>> {
        let mut payload = Map::new();
        payload.insert("order_id".to_string(), json!(numeric_id(order_id)?));
        Ok(payload)
    }

    /// Validated `/order/new` body for a request, without `request` and `nonce`
    async fn order_payload(&self, order: &OrderRequest) -> Result<Map<String, Value>> {
        order.validate()?;
        let order_type = order_type_param(order.order_type)?;

        let symbol = self.make_symbol(&order.pair).await?;
        let details = self.symbol_details(&symbol).await?;
        let min = parse_decimal("minimum_order_size", &details.minimum_order_size)?;
        let max = parse_decimal("maximum_order_size", &details.maximum_order_size)?;
        if order.amount < min {
            return Err(Error::InvalidOrder(format!("Minimum order size is {}", min)));
        }
        if order.amount > max {
            return Err(Error::InvalidOrder(format!("Maximum order size is {}", max)));
        }

        // Bitfinex wants a price even for market orders; it is ignored.
        let price = match order.price {
            Some(p) if order.order_type != OrderType::Market => p.to_string(),
            _ => "1.0".to_string(),
        };

        let mut payload = Map::new();
        payload.insert("symbol".to_string(), json!(symbol));
        payload.insert("amount".to_string(), json!(order.amount.to_string()));
        payload.insert("price".to_string(), json!(price));
        payload.insert("side".to_string(), json!(order.side.as_str()));
        payload.insert("type".to_string(), json!(order_type));
        payload.insert("exchange".to_string(), json!("bitfinex"));
        Ok(payload)
    }

    async fn fetch_order(&self, order_id: &OrderId) -> Result<RawOrder> {
        self.credentials.require()?;
        let payload = Self::order_id_payload(order_id)?;
        self.post("/order/status", payload).await
    }

    /// Cancels every open order on the account
    pub async fn cancel_all_orders(&self) -> Result<()> {
        self.credentials.require()?;
        let resp: RawResult = self.post("/order/cancel/all", Map::new()).await?;
        info!("Cancel all orders: {}", resp.result);
        Ok(())
    }

    pub async fn cancel_orders(&self, order_ids: &[OrderId]) -> Result<()> {
        self.credentials.require()?;
        let ids = order_ids.iter().map(numeric_id).collect::<Result<Vec<_>>>()?;
        let mut payload = Map::new();
        payload.insert("order_ids".to_string(), json!(ids));
        debug!("Cancelling orders: {:?}", ids);
        let _: Value = self.post("/order/cancel/multi", payload).await?;
        Ok(())
    }

    /// Cancels `order_id` and places `order` in its stead, returning the new id
    pub async fn replace_order(&self, order_id: &OrderId, order: &OrderRequest) -> Result<OrderId> {
        self.credentials.require()?;
        let id = numeric_id(order_id)?;
        let mut payload = self.order_payload(order).await?;
        payload.insert("order_id".to_string(), json!(id));

        info!(
            "Replacing order {}: {} {} {} @ {:?}",
            order_id, order.side, order.amount, order.pair, order.price
        );
        let placed: RawOrderId = self.post("/order/cancel/replace", payload).await?;
        Ok(OrderId::from(placed.id))
    }

    /// Scopes the API key may read or write, e.g. `orders`, `wallets`, `withdraw`
    pub async fn key_permissions(&self) -> Result<BTreeMap<String, KeyPermission>> {
        self.credentials.require()?;
        self.post("/key_info", Map::new()).await
    }

    /// `true` when the platform is operative, `false` during maintenance (v2 API)
    pub async fn platform_status(&self) -> Result<bool> {
        let status: Vec<i64> = self
            .get_url(&format!("{}/platform/status", self.v2_url), &[])
            .await?;
        match status.first() {
            Some(flag) => Ok(*flag == 1),
            None => Err(Error::Parse("platform status: empty response".to_string())),
        }
    }
}

fn numeric_id(order_id: &OrderId) -> Result<u64> {
    order_id
        .as_str()
        .parse()
        .map_err(|_| Error::InvalidOrder(format!("not a Bitfinex order id: {}", order_id)))
}

/// `exchange limit`, `exchange fill-or-kill`, ... (v1 has no stop-limit order)
fn order_type_param(order_type: OrderType) -> Result<String> {
    match order_type {
        OrderType::StopLimit => Err(Error::InvalidOrder(
            "stop-limit orders are not supported by Bitfinex".to_string(),
        )),
        t => Ok(format!("exchange {}", t)),
    }
}

/// `btcusd`, or `base:quote` when either side is not three letters
fn to_symbol(pair: &Pair) -> String {
    if pair.base.len() == 3 && pair.quote.len() == 3 {
        format!("{}{}", pair.base, pair.quote).to_lowercase()
    } else {
        format!("{}:{}", pair.base, pair.quote).to_lowercase()
    }
}

fn parse_symbol(symbol: &str) -> Option<Pair> {
    if let Some((base, quote)) = symbol.split_once(':') {
        return Some(Pair::new(base, quote));
    }
    if symbol.len() == 6 && symbol.is_ascii() {
        let (base, quote) = symbol.split_at(3);
        return Some(Pair::new(base, quote));
    }
    None
}

/// Fractional unix seconds, as Bitfinex sends them
fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>> {
    let secs = parse_decimal(field, raw)?;
    let whole = secs.trunc();
    let nanos = ((secs - whole) * Decimal::from(1_000_000_000)).trunc();

    whole
        .to_i64()
        .zip(nanos.to_u32())
        .and_then(|(s, n)| DateTime::from_timestamp(s, n))
        .ok_or_else(|| Error::Parse(format!("{}: timestamp out of range {:?}", field, raw)))
}

#[async_trait]
impl Exchange for Bitfinex {
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
            .symbols()
            .await?
            .iter()
            .filter_map(|s| {
                let pair = parse_symbol(s);
                if pair.is_none() {
                    warn!("Skipping unrecognised Bitfinex symbol {}", s);
                }
                pair
            })
            .collect();
        pairs.sort();
        Ok(pairs)
    }

    async fn ticker(&self, pair: &Pair) -> Result<Ticker> {
        let symbol = self.make_symbol(pair).await?;
        let raw: RawTicker = self.get(&format!("/pubticker/{}", symbol), &[]).await?;

        Ok(Ticker {
            ask: parse_decimal("ask", &raw.ask)?,
            bid: parse_decimal("bid", &raw.bid)?,
            high: parse_decimal("high", &raw.high)?,
            last: parse_decimal("last_price", &raw.last_price)?,
            low: parse_decimal("low", &raw.low)?,
            volume: parse_decimal("volume", &raw.volume)?,
            timestamp: parse_timestamp("timestamp", &raw.timestamp)?,
        })
    }

    async fn trades(&self, pair: &Pair) -> Result<Vec<Trade>> {
        let symbol = self.make_symbol(pair).await?;
        let raw: Vec<RawTrade> = self
            .get(
                &format!("/trades/{}", symbol),
                &[
                    ("timestamp", "0".to_string()),
                    ("limit_trades", TRADES_LIMIT.to_string()),
                ],
            )
            .await?;

        let mut trades = raw
            .into_iter()
            .map(|t| -> Result<Trade> {
                Ok(Trade {
                    quantity: parse_decimal("amount", &t.amount)?,
                    price: parse_decimal("price", &t.price)?,
                    side: t.side.parse::<Side>()?,
                    timestamp: DateTime::from_timestamp(t.timestamp, 0).ok_or_else(|| {
                        Error::Parse(format!("timestamp out of range {}", t.timestamp))
                    })?,
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
        let payload = self.order_payload(order).await?;

        info!(
            "Placing order: {} {} {} @ {:?}",
            order.side, order.amount, order.pair, order.price
        );
        let placed: RawOrderId = self.post("/order/new", payload).await?;
        Ok(OrderId::from(placed.id))
    }

    async fn cancel_order(&self, order_id: &OrderId) -> Result<()> {
        self.credentials.require()?;
        let payload = Self::order_id_payload(order_id)?;
        debug!("Cancelling order: {}", order_id);
        let _: Value = self.post("/order/cancel", payload).await?;
        Ok(())
    }

    async fn order_details(&self, order_id: &OrderId) -> Result<OrderDetails> {
        let raw = self.fetch_order(order_id).await?;

        let pair = parse_symbol(&raw.symbol)
            .ok_or_else(|| Error::Parse(format!("unrecognised symbol {}", raw.symbol)))?;
        // "exchange limit", "exchange fill-or-kill", "exchange stop limit", ...
        let order_type = raw
            .order_type
            .trim_start_matches("exchange ")
            .parse::<OrderType>()?;

        Ok(OrderDetails {
            pair,
            order_type,
            side: raw.side.parse::<Side>()?,
            quantity: parse_decimal("original_amount", &raw.original_amount)?,
            remaining: parse_decimal("remaining_amount", &raw.remaining_amount)?,
            price: parse_decimal("price", &raw.price)?,
            opened_at: parse_timestamp("timestamp", &raw.timestamp)?,
            status: OrderStatus::from_flags(raw.is_live, raw.is_cancelled),
        })
    }

    /// Only the live/cancelled flags are read, whatever the order type
    async fn order_status(&self, order_id: &OrderId) -> Result<OrderStatus> {
        let raw = self.fetch_order(order_id).await?;
        Ok(OrderStatus::from_flags(raw.is_live, raw.is_cancelled))
    }

    async fn active_orders(&self) -> Result<Vec<OrderId>> {
        self.credentials.require()?;
        let orders: Vec<RawOrderId> = self.post("/orders", Map::new()).await?;
        Ok(orders.into_iter().map(|o| OrderId::from(o.id)).collect())
    }

    async fn past_orders(&self) -> Result<Vec<OrderId>> {
        self.credentials.require()?;
        let orders: Vec<RawOrderId> = self.post("/orders/hist", Map::new()).await?;
        Ok(orders.into_iter().map(|o| OrderId::from(o.id)).collect())
    }
}
