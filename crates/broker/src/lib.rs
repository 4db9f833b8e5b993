//! Broker adapter trait (§6) with a `PaperBroker` (in-memory simulated
//! fills) and a `KiteBroker` (REST + WebSocket client against a
//! Kite-Connect-shaped gateway).

pub mod error;
pub mod kite;
pub mod paper;
pub mod types;

pub use error::BrokerError;
pub use paper::PaperBroker;
pub use types::{BrokerOrder, BrokerOrderSide, BrokerPosition, OrderId, OrderKind, OrderStatus, PlaceOrderRequest, Product};

use async_trait::async_trait;
use swingshort_common::{Symbol, Tick};
use tokio::sync::mpsc;

/// The broker gateway contract the decision layer depends on. `place`,
/// `modify`, `cancel`, `orderbook` and `positionbook` match §6 exactly;
/// `subscribe_ticks` is the WebSocket tick stream.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn place(&self, req: PlaceOrderRequest) -> Result<OrderId, BrokerError>;
    async fn modify(&self, order_id: &OrderId, price: Option<swingshort_common::Px>, trigger: Option<swingshort_common::Px>) -> Result<(), BrokerError>;
    async fn cancel(&self, order_id: &OrderId) -> Result<(), BrokerError>;
    async fn orderbook(&self) -> Result<Vec<BrokerOrder>, BrokerError>;
    async fn positionbook(&self) -> Result<Vec<BrokerPosition>, BrokerError>;
    async fn subscribe_ticks(&self, symbols: Vec<Symbol>) -> Result<mpsc::Receiver<Tick>, BrokerError>;
}
