//! Core traits - the surface every exchange adapter exposes

use async_trait::async_trait;

use crate::core::{Result, types::*};

/// Exchange trait - market data, account and order operations.
///
/// Operations that touch the account fail with [`crate::Error::Auth`] until
/// [`Exchange::authenticate`] has succeeded; no request is sent in that case.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Exchange name
    fn name(&self) -> &str;

    // ─────────────────────────────────────────────────────────────
    // Authentication
    // ─────────────────────────────────────────────────────────────

    /// Stores credentials and validates them with a balance request
    async fn authenticate(&self, api_key: &str, api_secret: &str) -> Result<()>;

    /// Drops stored credentials
    fn unauthenticate(&self);

    fn is_authenticated(&self) -> bool;

    // ─────────────────────────────────────────────────────────────
    // Market Data
    // ─────────────────────────────────────────────────────────────

    /// Listed pairs, sorted
    async fn pairs(&self) -> Result<Vec<Pair>>;

    /// Current ticker
    async fn ticker(&self, pair: &Pair) -> Result<Ticker>;

    /// Recent trades, most recent first
    async fn trades(&self, pair: &Pair) -> Result<Vec<Trade>>;

    // ─────────────────────────────────────────────────────────────
    // Account
    // ─────────────────────────────────────────────────────────────

    async fn balances(&self) -> Result<Balances>;

    // ─────────────────────────────────────────────────────────────
    // Orders
    // ─────────────────────────────────────────────────────────────

    /// Place an order, returning the exchange-assigned id
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderId>;

    async fn cancel_order(&self, order_id: &OrderId) -> Result<()>;

    async fn order_details(&self, order_id: &OrderId) -> Result<OrderDetails>;

    /// Status only, derived from [`Exchange::order_details`]
    async fn order_status(&self, order_id: &OrderId) -> Result<OrderStatus> {
        Ok(self.order_details(order_id).await?.status)
    }

    /// Ids of open orders
    async fn active_orders(&self) -> Result<Vec<OrderId>>;

    /// Ids of executed and cancelled orders
    async fn past_orders(&self) -> Result<Vec<OrderId>>;
}
