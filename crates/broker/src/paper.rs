//! In-memory simulated broker for dry runs and tests. Orders fill when fed
//! ticks through [`PaperBroker::ingest_tick`] — the paper build of the
//! engine drives this from the same tick stream BarAggregator/SwingDetector
//! see, so fills stay consistent with what the decision layer observed.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use swingshort_common::{Px, Qty, Symbol, Tick};
use tokio::sync::mpsc;

use crate::error::BrokerError;
use crate::types::{BrokerOrder, BrokerOrderSide, BrokerPosition, OrderId, OrderKind, OrderStatus, PlaceOrderRequest};
use crate::Broker;
use async_trait::async_trait;

#[derive(Debug, Clone)]
struct OrderRecord {
    req: PlaceOrderRequest,
    status: OrderStatus,
    filled_qty: Qty,
    avg_price: Option<Px>,
    triggered: bool,
}

/// A paper (simulated) broker. Fills entry `Limit` sells when price trades
/// at or below the limit (the "downward break fills the resting order"
/// behavior described in §4.5), and fills exit `StopLimit` buys at the
/// limit price once the trigger has been touched.
pub struct PaperBroker {
    orders: DashMap<OrderId, OrderRecord>,
    positions: DashMap<Symbol, BrokerPosition>,
    next_id: AtomicU64,
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperBroker {
    #[must_use]
    pub fn new() -> Self {
        Self { orders: DashMap::new(), positions: DashMap::new(), next_id: AtomicU64::new(1) }
    }

    /// Drive simulated fills from a tick observed on the same stream the
    /// decision layer is processing. Returns any orders that filled.
    pub fn ingest_tick(&self, tick: &Tick) -> Vec<BrokerOrder> {
        let mut filled = Vec::new();
        for mut entry in self.orders.iter_mut() {
            let order_id = entry.key().clone();
            let record = entry.value_mut();
            if record.status != OrderStatus::Open || record.req.symbol != tick.symbol {
                continue;
            }
            let fill_price = match (record.req.side, record.req.kind) {
                (BrokerOrderSide::Sell, OrderKind::Limit) => {
                    let limit = record.req.price.expect("limit sell requires a price");
                    (tick.last_price <= limit).then_some(limit)
                }
                (BrokerOrderSide::Buy, OrderKind::StopLimit) => {
                    let trigger = record.req.trigger.expect("stop-limit buy requires a trigger");
                    let limit = record.req.price.expect("stop-limit buy requires a limit");
                    if !record.triggered && tick.last_price >= trigger {
                        record.triggered = true;
                    }
                    record.triggered.then_some(limit)
                }
                (BrokerOrderSide::Buy, OrderKind::Market) | (BrokerOrderSide::Sell, OrderKind::Market) => {
                    Some(tick.last_price)
                }
                _ => None,
            };
            if let Some(price) = fill_price {
                record.status = OrderStatus::Complete;
                record.filled_qty = record.req.qty;
                record.avg_price = Some(price);
                self.apply_fill(record.req.symbol, record.req.side, record.req.qty, price);
                filled.push(BrokerOrder {
                    order_id,
                    symbol: record.req.symbol,
                    status: OrderStatus::Complete,
                    filled_qty: record.filled_qty,
                    avg_price: record.avg_price,
                });
            }
        }
        filled
    }

    fn apply_fill(&self, symbol: Symbol, side: BrokerOrderSide, qty: Qty, price: Px) {
        let signed = match side {
            BrokerOrderSide::Sell => -qty.as_i64(),
            BrokerOrderSide::Buy => qty.as_i64(),
        };
        self.positions
            .entry(symbol)
            .and_modify(|p| p.qty += signed)
            .or_insert(BrokerPosition { symbol, qty: signed, avg_price: price });
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn place(&self, req: PlaceOrderRequest) -> Result<OrderId, BrokerError> {
        let id = format!("PAPER-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.orders.insert(id.clone(), OrderRecord { req, status: OrderStatus::Open, filled_qty: Qty::ZERO, avg_price: None, triggered: false });
        Ok(id)
    }

    async fn modify(&self, order_id: &OrderId, price: Option<Px>, trigger: Option<Px>) -> Result<(), BrokerError> {
        let mut entry = self.orders.get_mut(order_id).ok_or_else(|| BrokerError::Permanent("unknown order".into()))?;
        if entry.status != OrderStatus::Open {
            return Err(BrokerError::Permanent("order not open".into()));
        }
        if let Some(p) = price {
            entry.req.price = Some(p);
        }
        if let Some(t) = trigger {
            entry.req.trigger = Some(t);
        }
        Ok(())
    }

    async fn cancel(&self, order_id: &OrderId) -> Result<(), BrokerError> {
        let mut entry = self.orders.get_mut(order_id).ok_or_else(|| BrokerError::Permanent("unknown order".into()))?;
        if entry.status == OrderStatus::Open {
            entry.status = OrderStatus::Cancelled;
        }
        Ok(())
    }

    async fn orderbook(&self) -> Result<Vec<BrokerOrder>, BrokerError> {
        Ok(self
            .orders
            .iter()
            .map(|e| BrokerOrder { order_id: e.key().clone(), symbol: e.req.symbol, status: e.status, filled_qty: e.filled_qty, avg_price: e.avg_price })
            .collect())
    }

    async fn positionbook(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        Ok(self.positions.iter().map(|e| *e.value()).collect())
    }

    async fn subscribe_ticks(&self, _symbols: Vec<Symbol>) -> Result<mpsc::Receiver<Tick>, BrokerError> {
        // The paper build sources ticks from the configured feed adapters,
        // not from the broker; this stream intentionally stays empty.
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}
