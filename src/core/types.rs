//! Core types - Strong typing for safety

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::core::{Error, Result};

/// Tradeable pair, e.g. BTC/USD: `base` is traded, priced in `quote`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pair {
    pub base: String,
    pub quote: String,
}

impl Pair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }
}

impl std::fmt::Display for Pair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for Pair {
    type Err = Error;

    /// Parses `BASE/QUOTE`
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() => {
                Ok(Pair::new(base, quote))
            }
            _ => Err(Error::Parse(format!("expected BASE/QUOTE, got {:?}", s))),
        }
    }
}

/// Market snapshot for a pair. Prices in quote, volume in base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub ask: Decimal,
    pub bid: Decimal,
    pub high: Decimal,
    pub last: Decimal,
    pub low: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Public trade print
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub quantity: Decimal,
    pub price: Decimal,
    pub side: Side,
    pub timestamp: DateTime<Utc>,
}

/// Asset symbol -> amount
pub type Balances = BTreeMap<String, Decimal>;

/// Exchange-assigned order identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for OrderId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for OrderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for OrderId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(Error::Parse(format!("unknown side {:?}", other))),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
    TrailingStop,
    FillOrKill,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Stop => "stop",
            OrderType::StopLimit => "stop-limit",
            OrderType::TrailingStop => "trailing-stop",
            OrderType::FillOrKill => "fill-or-kill",
        }
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = Error;

    /// Accepts `stop-limit`, `stop limit` and `STOP_LIMIT` alike
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s
            .trim()
            .to_ascii_lowercase()
            .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        match normalized.as_str() {
            "market" => Ok(OrderType::Market),
            "limit" => Ok(OrderType::Limit),
            "stop" => Ok(OrderType::Stop),
            "stop-limit" => Ok(OrderType::StopLimit),
            "trailing-stop" => Ok(OrderType::TrailingStop),
            "fill-or-kill" => Ok(OrderType::FillOrKill),
            _ => Err(Error::Parse(format!("unknown order type {:?}", s))),
        }
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Active,
    Canceled,
    Executed,
}

impl OrderStatus {
    /// Common precedence used by both exchanges: live wins over cancelled.
    pub fn from_flags(is_live: bool, is_cancelled: bool) -> Self {
        if is_live {
            OrderStatus::Active
        } else if is_cancelled {
            OrderStatus::Canceled
        } else {
            OrderStatus::Executed
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Active => write!(f, "active"),
            OrderStatus::Canceled => write!(f, "canceled"),
            OrderStatus::Executed => write!(f, "executed"),
        }
    }
}

/// New order as submitted by the caller
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub pair: Pair,
    pub side: Side,
    pub amount: Decimal,
    /// Must be `None` for market orders and set for every other type
    pub price: Option<Decimal>,
    pub order_type: OrderType,
}

impl OrderRequest {
    pub fn market(pair: Pair, side: Side, amount: Decimal) -> Self {
        Self {
            pair,
            side,
            amount,
            price: None,
            order_type: OrderType::Market,
        }
    }

    pub fn limit(pair: Pair, side: Side, amount: Decimal, price: Decimal) -> Self {
        Self {
            pair,
            side,
            amount,
            price: Some(price),
            order_type: OrderType::Limit,
        }
    }

    /// Exchange-independent sanity checks
    pub fn validate(&self) -> Result<()> {
        if self.amount <= Decimal::ZERO {
            return Err(Error::InvalidOrder(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }
        match (self.order_type, self.price) {
            (OrderType::Market, Some(_)) => Err(Error::InvalidOrder(
                "do not provide price for market orders".to_string(),
            )),
            (t, None) if t != OrderType::Market => Err(Error::InvalidOrder(format!(
                "{} orders require a price",
                self.order_type
            ))),
            (_, Some(p)) if p <= Decimal::ZERO => Err(Error::InvalidOrder(format!(
                "price must be positive, got {}",
                p
            ))),
            _ => Ok(()),
        }
    }
}

/// Order as reported back by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetails {
    pub pair: Pair,
    pub order_type: OrderType,
    pub side: Side,
    pub quantity: Decimal,
    pub remaining: Decimal,
    pub price: Decimal,
    pub opened_at: DateTime<Utc>,
    pub status: OrderStatus,
}

/// Parses an exchange decimal string, naming the field on failure
pub(crate) fn parse_decimal(field: &str, raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw.trim())
        .or_else(|_| Decimal::from_scientific(raw.trim()))
        .map_err(|e| Error::Parse(format!("{}: {:?} ({})", field, raw, e)))
}

/// Converts a float from a JSON number into a decimal
pub(crate) fn decimal_from_f64(field: &str, value: f64) -> Result<Decimal> {
    Decimal::try_from(value).map_err(|e| Error::Parse(format!("{}: {} ({})", field, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_is_uppercased() {
        let pair = Pair::new("btc", "usd");
        assert_eq!(pair.base, "BTC");
        assert_eq!(pair.quote, "USD");
        assert_eq!(pair.to_string(), "BTC/USD");
    }

    #[test]
    fn test_pair_from_str() {
        assert_eq!("eth/btc".parse::<Pair>().unwrap(), Pair::new("ETH", "BTC"));
        assert!("ETHBTC".parse::<Pair>().is_err());
        assert!("/BTC".parse::<Pair>().is_err());
    }

    #[test]
    fn test_side_parse() {
        assert_eq!("BUY".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!("sell".parse::<Side>().unwrap(), Side::Sell);
        assert!("hold".parse::<Side>().is_err());
    }

    #[test]
    fn test_order_type_parse() {
        assert_eq!("LIMIT".parse::<OrderType>().unwrap(), OrderType::Limit);
        assert_eq!("fill-or-kill".parse::<OrderType>().unwrap(), OrderType::FillOrKill);
        assert_eq!("trailing-stop".parse::<OrderType>().unwrap(), OrderType::TrailingStop);
        assert_eq!("stop limit".parse::<OrderType>().unwrap(), OrderType::StopLimit);
        assert_eq!("STOP_LIMIT".parse::<OrderType>().unwrap(), OrderType::StopLimit);
        assert!("iceberg".parse::<OrderType>().is_err());

        for t in [OrderType::StopLimit, OrderType::TrailingStop, OrderType::FillOrKill] {
            assert_eq!(t.to_string().parse::<OrderType>().unwrap(), t);
        }
    }

    #[test]
    fn test_status_precedence() {
        assert_eq!(OrderStatus::from_flags(true, true), OrderStatus::Active);
        assert_eq!(OrderStatus::from_flags(false, true), OrderStatus::Canceled);
        assert_eq!(OrderStatus::from_flags(false, false), OrderStatus::Executed);
    }

    #[test]
    fn test_market_order_with_price_rejected() {
        let mut order = OrderRequest::market(Pair::new("BTC", "USD"), Side::Buy, Decimal::ONE);
        assert!(order.validate().is_ok());

        order.price = Some(Decimal::from(1000));
        assert!(matches!(order.validate(), Err(Error::InvalidOrder(_))));
    }

    #[test]
    fn test_limit_order_requires_price() {
        let mut order = OrderRequest::limit(
            Pair::new("BTC", "USD"),
            Side::Sell,
            Decimal::ONE,
            Decimal::from(1000),
        );
        assert!(order.validate().is_ok());

        order.price = None;
        assert!(matches!(order.validate(), Err(Error::InvalidOrder(_))));

        order.order_type = OrderType::FillOrKill;
        assert!(matches!(order.validate(), Err(Error::InvalidOrder(_))));
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let order = OrderRequest::market(Pair::new("BTC", "USD"), Side::Buy, Decimal::ZERO);
        assert!(matches!(order.validate(), Err(Error::InvalidOrder(_))));
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("ask", "6393.9").unwrap(), Decimal::new(63939, 1));
        assert_eq!(parse_decimal("amount", "1e-5").unwrap(), Decimal::new(1, 5));
        assert!(matches!(parse_decimal("bid", "n/a"), Err(Error::Parse(_))));
    }
}
