//! REST + WebSocket client against a Kite-Connect-shaped gateway. Order
//! placement/modification/cancellation and the order/position books go over
//! REST; ticks arrive over a WebSocket stream keyed by instrument token.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use swingshort_common::{Px, Qty, Symbol, Tick, TickSource};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

use crate::error::BrokerError;
use crate::types::{BrokerOrder, BrokerOrderSide, BrokerPosition, OrderId, OrderKind, OrderStatus, PlaceOrderRequest};
use crate::Broker;
use async_trait::async_trait;

#[derive(Clone)]
pub struct KiteConfig {
    pub api_key: String,
    pub access_token: String,
    pub base_url: String,
    pub ws_url: String,
    /// Maps a trading symbol to the numeric instrument token the WebSocket
    /// feed identifies it by; populated from the instruments dump at
    /// startup, outside this client's scope.
    pub instrument_tokens: Arc<FxHashMap<Symbol, u32>>,
}

impl std::fmt::Debug for KiteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KiteConfig")
            .field("api_key", &"***")
            .field("access_token", &"***")
            .field("base_url", &self.base_url)
            .field("ws_url", &self.ws_url)
            .field("instrument_tokens", &self.instrument_tokens.len())
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct OrderPayload {
    tradingsymbol: String,
    exchange: &'static str,
    transaction_type: &'static str,
    order_type: &'static str,
    quantity: i64,
    product: &'static str,
    validity: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trigger_price: Option<f64>,
}

pub struct KiteBroker {
    client: Client,
    config: KiteConfig,
}

impl KiteBroker {
    #[must_use]
    pub fn new(config: KiteConfig) -> Self {
        Self { client: Client::new(), config }
    }

    fn auth_header(&self) -> String {
        format!("token {}:{}", self.config.api_key, self.config.access_token)
    }

    fn classify(status: reqwest::StatusCode, body: &Value) -> BrokerError {
        let msg = body["message"].as_str().unwrap_or("unknown kite error").to_string();
        if status.is_server_error() || status.as_u16() == 429 {
            BrokerError::Transient(msg)
        } else if status.as_u16() == 403 || body["error_type"] == "TokenException" {
            BrokerError::AuthExpired(msg)
        } else {
            BrokerError::Permanent(msg)
        }
    }

    async fn send_json(&self, req: reqwest::RequestBuilder) -> Result<Value, BrokerError> {
        let response = req.send().await.map_err(|e| BrokerError::Transient(e.to_string()))?;
        let status = response.status();
        let body: Value = response.json().await.map_err(|e| BrokerError::Transient(e.to_string()))?;
        if body["status"] == "success" {
            Ok(body)
        } else {
            Err(Self::classify(status, &body))
        }
    }
}

#[async_trait]
impl Broker for KiteBroker {
    async fn place(&self, req: PlaceOrderRequest) -> Result<OrderId, BrokerError> {
        let payload = OrderPayload {
            tradingsymbol: req.symbol.to_string(),
            exchange: "NFO",
            transaction_type: match req.side {
                BrokerOrderSide::Buy => "BUY",
                BrokerOrderSide::Sell => "SELL",
            },
            order_type: match req.kind {
                OrderKind::Market => "MARKET",
                OrderKind::Limit => "LIMIT",
                OrderKind::StopLimit => "SL",
            },
            quantity: req.qty.as_i64(),
            product: "MIS",
            validity: "DAY",
            price: req.price.map(Px::as_rupees),
            trigger_price: req.trigger.map(Px::as_rupees),
        };
        let url = format!("{}/orders/regular", self.config.base_url);
        let body = self
            .send_json(self.client.post(&url).header("X-Kite-Version", "3").header("Authorization", self.auth_header()).json(&payload))
            .await?;
        body["data"]["order_id"].as_str().map(str::to_string).ok_or_else(|| BrokerError::Permanent("missing order_id in response".into()))
    }

    async fn modify(&self, order_id: &OrderId, price: Option<Px>, trigger: Option<Px>) -> Result<(), BrokerError> {
        let url = format!("{}/orders/regular/{}", self.config.base_url, order_id);
        let mut form = Vec::new();
        if let Some(p) = price {
            form.push(("price", p.as_rupees().to_string()));
        }
        if let Some(t) = trigger {
            form.push(("trigger_price", t.as_rupees().to_string()));
        }
        self.send_json(self.client.put(&url).header("X-Kite-Version", "3").header("Authorization", self.auth_header()).form(&form)).await?;
        Ok(())
    }

    async fn cancel(&self, order_id: &OrderId) -> Result<(), BrokerError> {
        let url = format!("{}/orders/regular/{}", self.config.base_url, order_id);
        self.send_json(self.client.delete(&url).header("X-Kite-Version", "3").header("Authorization", self.auth_header())).await?;
        Ok(())
    }

    async fn orderbook(&self) -> Result<Vec<BrokerOrder>, BrokerError> {
        let url = format!("{}/orders", self.config.base_url);
        let body = self.send_json(self.client.get(&url).header("X-Kite-Version", "3").header("Authorization", self.auth_header())).await?;
        let mut out = Vec::new();
        for row in body["data"].as_array().into_iter().flatten() {
            let symbol: Symbol = match row["tradingsymbol"].as_str().and_then(|s| s.parse().ok()) {
                Some(s) => s,
                None => continue,
            };
            let status = match row["status"].as_str().unwrap_or("") {
                "COMPLETE" => OrderStatus::Complete,
                "REJECTED" => OrderStatus::Rejected,
                "CANCELLED" => OrderStatus::Cancelled,
                _ => OrderStatus::Open,
            };
            out.push(BrokerOrder {
                order_id: row["order_id"].as_str().unwrap_or_default().to_string(),
                symbol,
                status,
                filled_qty: Qty::new(row["filled_quantity"].as_i64().unwrap_or(0)),
                avg_price: row["average_price"].as_f64().map(Px::from_rupees),
            });
        }
        Ok(out)
    }

    async fn positionbook(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let url = format!("{}/portfolio/positions", self.config.base_url);
        let body = self.send_json(self.client.get(&url).header("X-Kite-Version", "3").header("Authorization", self.auth_header())).await?;
        let mut out = Vec::new();
        for row in body["data"]["net"].as_array().into_iter().flatten() {
            let symbol: Symbol = match row["tradingsymbol"].as_str().and_then(|s| s.parse().ok()) {
                Some(s) => s,
                None => continue,
            };
            out.push(BrokerPosition {
                symbol,
                qty: row["quantity"].as_i64().unwrap_or(0),
                avg_price: Px::from_rupees(row["average_price"].as_f64().unwrap_or(0.0)),
            });
        }
        Ok(out)
    }

    async fn subscribe_ticks(&self, symbols: Vec<Symbol>) -> Result<mpsc::Receiver<Tick>, BrokerError> {
        let tokens: Vec<u32> = symbols.iter().filter_map(|s| self.config.instrument_tokens.get(s).copied()).collect();
        let by_token: FxHashMap<u32, Symbol> = self.config.instrument_tokens.iter().map(|(s, t)| (*t, *s)).collect();
        let url = format!("{}?api_key={}&access_token={}", self.config.ws_url, self.config.api_key, self.config.access_token);

        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(async move {
            let (ws, _) = match tokio_tungstenite::connect_async(&url).await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "kite websocket connect failed");
                    return;
                }
            };
            let (mut write, mut read) = ws.split();
            let subscribe = serde_json::json!({"a": "subscribe", "v": tokens});
            if write.send(Message::Text(subscribe.to_string())).await.is_err() {
                return;
            }
            while let Some(Ok(msg)) = read.next().await {
                let Message::Text(text) = msg else { continue };
                let Ok(rows) = serde_json::from_str::<Vec<RawTick>>(&text) else { continue };
                for row in rows {
                    let Some(symbol) = by_token.get(&row.instrument_token).copied() else { continue };
                    let tick = Tick { symbol, ts_ms: row.timestamp_ms, last_price: Px::from_rupees(row.last_price), cum_volume: row.volume as i64, source: TickSource::Primary };
                    if tx.send(tick).await.is_err() {
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }
}

/// Simplified tick envelope for the gateway's JSON tick mode (the
/// production Kite feed is a packed binary frame; a JSON mode is exposed
/// for staging/paper use and is what this client speaks).
#[derive(Debug, Deserialize)]
struct RawTick {
    instrument_token: u32,
    last_price: f64,
    volume: u64,
    timestamp_ms: i64,
}
