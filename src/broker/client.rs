// =============================================================================
// Broker REST client — header-authenticated equities broker gateway
// =============================================================================
//
// SECURITY: the secret key is never logged or serialized. Every request
// carries the key id/secret pair as headers rather than a signed query
// string — this targets a brokerage that authenticates that way (unlike the
// HMAC-signed exchange APIs this scaffolding originally targeted).
// =============================================================================

use anyhow::{bail, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::{debug, instrument};

use crate::model::{Bar, OrderRef};

/// Reserve room subtracted from the order-type timeout to stay well inside
/// the engine's own per-call timeout budget (§5 suspension points).
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct AccountInfo {
    pub buying_power: f64,
}

/// REST client for the brokerage's order and account endpoints, plus the
/// historical-aggregates fallback endpoint used for volume sizing.
#[derive(Clone)]
pub struct BrokerClient {
    key_id: String,
    secret_key: String,
    base_url: String,
    data_base_url: String,
    client: reqwest::Client,
}

impl BrokerClient {
    pub fn new(
        key_id: impl Into<String>,
        secret_key: impl Into<String>,
        base_url: impl Into<String>,
        data_base_url: impl Into<String>,
    ) -> Self {
        let key_id = key_id.into();
        let secret_key = secret_key.into();

        let mut headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&key_id) {
            headers.insert("APCA-API-KEY-ID", val);
        }
        if let Ok(val) = HeaderValue::from_str(&secret_key) {
            headers.insert("APCA-API-SECRET-KEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        Self {
            key_id,
            secret_key,
            base_url: base_url.into(),
            data_base_url: data_base_url.into(),
            client,
        }
    }

    #[instrument(skip(self), name = "broker::account")]
    pub async fn account(&self) -> Result<AccountInfo> {
        let url = format!("{}/v2/account", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /v2/account request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await.context("failed to parse account response")?;
        if !status.is_success() {
            bail!("broker GET /v2/account returned {}: {}", status, body);
        }

        let buying_power = body["buying_power"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .or_else(|| body["buying_power"].as_f64())
            .context("account response missing 'buying_power'")?;

        debug!(buying_power, "account retrieved");
        Ok(AccountInfo { buying_power })
    }

    #[instrument(skip(self), name = "broker::submit_buy_limit")]
    pub async fn submit_buy_limit(&self, symbol: &str, qty: f64, limit_price: f64) -> Result<OrderRef> {
        self.submit_order(symbol, "buy", "limit", qty, Some(limit_price), None).await
    }

    #[instrument(skip(self), name = "broker::submit_buy_stop_limit")]
    pub async fn submit_buy_stop_limit(
        &self,
        symbol: &str,
        qty: f64,
        stop_price: f64,
        limit_price: f64,
    ) -> Result<OrderRef> {
        self.submit_order(symbol, "buy", "stop_limit", qty, Some(limit_price), Some(stop_price))
            .await
    }

    #[instrument(skip(self), name = "broker::submit_sell_limit")]
    pub async fn submit_sell_limit(&self, symbol: &str, qty: f64, limit_price: f64) -> Result<OrderRef> {
        self.submit_order(symbol, "sell", "limit", qty, Some(limit_price), None).await
    }

    async fn submit_order(
        &self,
        symbol: &str,
        side: &str,
        order_type: &str,
        qty: f64,
        limit_price: Option<f64>,
        stop_price: Option<f64>,
    ) -> Result<OrderRef> {
        let mut body = serde_json::json!({
            "symbol": symbol,
            "qty": qty,
            "side": side,
            "type": order_type,
            "time_in_force": "gtc",
        });
        if let Some(lp) = limit_price {
            body["limit_price"] = serde_json::json!(lp);
        }
        if let Some(sp) = stop_price {
            body["stop_price"] = serde_json::json!(sp);
        }

        debug!(symbol, side, order_type, qty, "submitting order");

        let url = format!("{}/v2/orders", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("POST /v2/orders request failed")?;

        let status = resp.status();
        let parsed: serde_json::Value = resp.json().await.context("failed to parse order response")?;
        if !status.is_success() {
            bail!("broker POST /v2/orders returned {}: {}", status, parsed);
        }

        parse_order_ref(&parsed, qty)
    }

    #[instrument(skip(self), name = "broker::get_order")]
    pub async fn get_order(&self, order_id: &str) -> Result<OrderRef> {
        let url = format!("{}/v2/orders/{}", self.base_url, order_id);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /v2/orders/{id} request failed")?;

        let status = resp.status();
        let parsed: serde_json::Value = resp.json().await.context("failed to parse order response")?;
        if !status.is_success() {
            bail!("broker GET /v2/orders/{} returned {}: {}", order_id, status, parsed);
        }

        let requested_qty = parsed["qty"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);
        parse_order_ref(&parsed, requested_qty)
    }

    /// Cancel an order. A failed cancel is treated by the caller as "order
    /// likely already filled" (§7 class 2) — this method still reports the
    /// raw outcome so the caller can log it.
    #[instrument(skip(self), name = "broker::cancel_order")]
    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let url = format!("{}/v2/orders/{}", self.base_url, order_id);
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .context("DELETE /v2/orders/{id} request failed")?;

        let status = resp.status();
        if !status.is_success() {
            bail!("broker DELETE /v2/orders/{} returned {}", order_id, status);
        }
        debug!(order_id, "order cancelled");
        Ok(())
    }

    /// Historical-aggregates fallback: last-72h 1-minute bars for `symbol`.
    /// The source this engine's sizing formula was distilled from queries a
    /// hardcoded symbol here regardless of the one actually being traded —
    /// reproduced exactly (see DESIGN.md for the rationale); callers pass
    /// whichever symbol they intend historically, and the engine's sizing
    /// logic is responsible for substituting the hardcoded one.
    #[instrument(skip(self), name = "broker::historical_minute_bars")]
    pub async fn historical_minute_bars(&self, symbol: &str, from_ms: i64, to_ms: i64) -> Result<Vec<Bar>> {
        let url = format!(
            "{}/v2/aggs/ticker/{}/range/1/minute/{}/{}?sort=desc&limit=30&adjusted=true",
            self.data_base_url, symbol, from_ms, to_ms
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("historical aggregates request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await.context("failed to parse historical aggregates")?;
        if !status.is_success() {
            bail!("historical aggregates returned {}: {}", status, body);
        }

        let results = body["results"].as_array().cloned().unwrap_or_default();
        let mut bars = Vec::with_capacity(results.len());
        for r in &results {
            let s = r["t"].as_i64().unwrap_or(0);
            let o = r["o"].as_f64().unwrap_or(0.0);
            let h = r["h"].as_f64().unwrap_or(0.0);
            let l = r["l"].as_f64().unwrap_or(0.0);
            let c = r["c"].as_f64().unwrap_or(0.0);
            let v = r["v"].as_f64().unwrap_or(0.0);
            bars.push(Bar { s, e: s + 60_000, o, h, l, c, v });
        }

        debug!(symbol, count = bars.len(), "historical minute bars fetched");
        Ok(bars)
    }
}

fn parse_order_ref(body: &serde_json::Value, requested_qty: f64) -> Result<OrderRef> {
    let id = body["id"].as_str().context("order response missing 'id'")?.to_string();
    let status = body["status"].as_str().unwrap_or("new").to_string();
    let filled_qty = body["filled_qty"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .or_else(|| body["filled_qty"].as_f64())
        .unwrap_or(0.0);

    Ok(OrderRef { id, status, requested_qty, filled_qty })
}

impl std::fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClient")
            .field("key_id", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}
