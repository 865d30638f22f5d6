// =============================================================================
// Broker Gateway module
// =============================================================================
//
// `Broker` is the narrow async contract the strategy core depends on (§2.2):
// account lookup, order submission/cancellation/lookup, and the historical-
// aggregates fallback used for volume sizing. `BrokerClient` is the live REST
// implementation; tests substitute an in-memory fake so the strategy core's
// scenario tests (§8) never touch the network.
// =============================================================================

pub mod client;

pub use client::BrokerClient;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{Bar, OrderRef};

#[async_trait]
pub trait Broker: Send + Sync {
    async fn account(&self) -> Result<client::AccountInfo>;
    async fn submit_buy_limit(&self, symbol: &str, qty: f64, limit_price: f64) -> Result<OrderRef>;
    async fn submit_buy_stop_limit(
        &self,
        symbol: &str,
        qty: f64,
        stop_price: f64,
        limit_price: f64,
    ) -> Result<OrderRef>;
    async fn submit_sell_limit(&self, symbol: &str, qty: f64, limit_price: f64) -> Result<OrderRef>;
    async fn get_order(&self, order_id: &str) -> Result<OrderRef>;
    async fn cancel_order(&self, order_id: &str) -> Result<()>;
    async fn historical_minute_bars(&self, symbol: &str, from_ms: i64, to_ms: i64) -> Result<Vec<Bar>>;
}

#[async_trait]
impl Broker for BrokerClient {
    async fn account(&self) -> Result<client::AccountInfo> {
        BrokerClient::account(self).await
    }

    async fn submit_buy_limit(&self, symbol: &str, qty: f64, limit_price: f64) -> Result<OrderRef> {
        BrokerClient::submit_buy_limit(self, symbol, qty, limit_price).await
    }

    async fn submit_buy_stop_limit(
        &self,
        symbol: &str,
        qty: f64,
        stop_price: f64,
        limit_price: f64,
    ) -> Result<OrderRef> {
        BrokerClient::submit_buy_stop_limit(self, symbol, qty, stop_price, limit_price).await
    }

    async fn submit_sell_limit(&self, symbol: &str, qty: f64, limit_price: f64) -> Result<OrderRef> {
        BrokerClient::submit_sell_limit(self, symbol, qty, limit_price).await
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderRef> {
        BrokerClient::get_order(self, order_id).await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        BrokerClient::cancel_order(self, order_id).await
    }

    async fn historical_minute_bars(&self, symbol: &str, from_ms: i64, to_ms: i64) -> Result<Vec<Bar>> {
        BrokerClient::historical_minute_bars(self, symbol, from_ms, to_ms).await
    }
}
