//! Request/response shapes for the `Broker` trait (§6).

use serde::{Deserialize, Serialize};
use swingshort_common::{Px, Qty, Symbol};

pub type OrderId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerOrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    Limit,
    StopLimit,
}

/// Only intraday (MIS-equivalent) positions are used; margin computation
/// is out of scope and the broker is authoritative for position existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Product {
    Intraday,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    Complete,
    Rejected,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub symbol: Symbol,
    pub side: BrokerOrderSide,
    pub kind: OrderKind,
    pub price: Option<Px>,
    pub trigger: Option<Px>,
    pub qty: Qty,
    pub product: Product,
}

#[derive(Debug, Clone)]
pub struct BrokerOrder {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub status: OrderStatus,
    pub filled_qty: Qty,
    pub avg_price: Option<Px>,
}

#[derive(Debug, Clone, Copy)]
pub struct BrokerPosition {
    pub symbol: Symbol,
    /// Net quantity; negative for a net-short book (this system only ever
    /// shorts, so live positions are negative here).
    pub qty: i64,
    pub avg_price: Px,
}
